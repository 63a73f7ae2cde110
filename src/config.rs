use actix_web::cookie::Key;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_TTL_SECS: i64 = 1200;
pub const DEFAULT_SESSION_TTL_SECS: i64 = 86_400;

/// Names and lifetime used by the CSRF manager.
#[derive(Debug, Clone)]
pub struct CsrfSettings {
    pub field_name: String,
    pub header_name: String,
    pub cookie_name: String,
    pub cookie_domain: Option<String>,
    pub secure: bool,
    pub ttl_secs: i64,
}

impl Default for CsrfSettings {
    fn default() -> Self {
        Self {
            field_name: "csrf_token".to_string(),
            header_name: "X-CSRF-Token".to_string(),
            cookie_name: "csrf_token_cookie".to_string(),
            cookie_domain: None,
            secure: false,
            ttl_secs: DEFAULT_TTL_SECS,
        }
    }
}

impl CsrfSettings {
    /// Session key holding the token, namespaced after the form field.
    pub fn token_key(&self) -> String {
        format!("csrf_{}", self.field_name)
    }

    pub fn time_key(&self) -> &'static str {
        "csrf_token_time"
    }
}

pub struct AppConfig {
    pub bind_addr: String,
    pub session_key: Key,
    pub session_ttl_secs: i64,
    pub csrf: CsrfSettings,
}

impl AppConfig {
    /// Load configuration from the process environment.
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        // Protects the session cookie. A generated key invalidates every cookie on restart.
        let session_key = match lookup("SESSION_KEY") {
            Some(val) if val.len() >= 64 => {
                log::info!("Using SESSION_KEY from environment");
                Key::from(val.as_bytes())
            }
            Some(val) => {
                log::warn!("SESSION_KEY too short ({} bytes, need 64+), generating random key", val.len());
                Key::generate()
            }
            None => {
                log::warn!("No SESSION_KEY set, generating random key (sessions lost on restart)");
                Key::generate()
            }
        };

        let secure = parse_bool(lookup("COOKIE_SECURE").as_deref(), "COOKIE_SECURE", false);
        let cookie_domain = lookup("COOKIE_DOMAIN")
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        let ttl_secs = parse_secs(lookup("CSRF_TTL_SECS").as_deref(), "CSRF_TTL_SECS", DEFAULT_TTL_SECS);
        let session_ttl_secs = parse_secs(
            lookup("SESSION_TTL_SECS").as_deref(),
            "SESSION_TTL_SECS",
            DEFAULT_SESSION_TTL_SECS,
        );

        AppConfig {
            bind_addr,
            session_key,
            session_ttl_secs,
            csrf: CsrfSettings {
                cookie_domain,
                secure,
                ttl_secs,
                ..CsrfSettings::default()
            },
        }
    }
}

fn parse_secs(raw: Option<&str>, name: &str, default: i64) -> i64 {
    match raw {
        None => default,
        Some(raw) => match raw.trim().parse::<i64>() {
            Ok(secs) if secs > 0 => secs,
            _ => {
                log::warn!("Invalid {name} {raw:?}, using {default}");
                default
            }
        },
    }
}

fn parse_bool(raw: Option<&str>, name: &str, default: bool) -> bool {
    match raw.map(|v| v.trim().to_ascii_lowercase()) {
        None => default,
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        Some(v) => {
            log::warn!("Invalid {name} value {v:?}, using {default}");
            default
        }
    }
}
