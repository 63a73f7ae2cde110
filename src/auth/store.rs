//! Server-side session storage.
//!
//! The session cookie only carries an opaque key; state stays in process
//! memory. Suitable for a single server. Sessions are lost on restart.

use actix_session::{
    SessionMiddleware,
    config::BrowserSession,
    storage::{LoadError, SaveError, SessionKey, SessionStore, UpdateError, generate_session_key},
};
use actix_web::cookie::{Key, SameSite, time::Duration};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::auth::csrf::CsrfManager;

struct StoredSession {
    state: HashMap<String, String>,
    expires_at: Instant,
}

/// In-memory backend for `actix_session`, keyed by a random session key.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, StoredSession>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drop expired sessions, returning how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        let now = Instant::now();
        sessions.retain(|_, s| s.expires_at > now);
        before - sessions.len()
    }

    fn insert(&self, key: &str, state: HashMap<String, String>, ttl: &Duration) {
        let expires_at = expiry(ttl);
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(key.to_string(), StoredSession { state, expires_at });
    }
}

fn expiry(ttl: &Duration) -> Instant {
    Instant::now() + std::time::Duration::from_secs(ttl.whole_seconds().max(0) as u64)
}

impl SessionStore for MemorySessionStore {
    async fn load(&self, session_key: &SessionKey) -> Result<Option<HashMap<String, String>>, LoadError> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let key = session_key.as_ref();
        match sessions.get(key) {
            Some(s) if s.expires_at > Instant::now() => Ok(Some(s.state.clone())),
            Some(_) => {
                sessions.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn save(&self, session_state: HashMap<String, String>, ttl: &Duration) -> Result<SessionKey, SaveError> {
        let key = generate_session_key();
        self.insert(key.as_ref(), session_state, ttl);
        Ok(key)
    }

    async fn update(
        &self,
        session_key: SessionKey,
        session_state: HashMap<String, String>,
        ttl: &Duration,
    ) -> Result<SessionKey, UpdateError> {
        let known = self
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(session_key.as_ref());
        if !known {
            // Deleted or expired in the meantime: never resurrect a key.
            return self.save(session_state, ttl).await.map_err(|err| match err {
                SaveError::Serialization(e) => UpdateError::Serialization(e),
                SaveError::Other(e) => UpdateError::Other(e),
            });
        }
        self.insert(session_key.as_ref(), session_state, ttl);
        Ok(session_key)
    }

    async fn update_ttl(&self, session_key: &SessionKey, ttl: &Duration) -> Result<(), anyhow::Error> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(s) = sessions.get_mut(session_key.as_ref()) {
            s.expires_at = expiry(ttl);
        }
        Ok(())
    }

    async fn delete(&self, session_key: &SessionKey) -> Result<(), anyhow::Error> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_key.as_ref());
        Ok(())
    }
}

/// Session cookie middleware: HttpOnly, `SameSite=Lax`, `Secure` iff served over TLS.
pub fn session_middleware(
    store: MemorySessionStore,
    key: Key,
    secure: bool,
    ttl_secs: i64,
) -> SessionMiddleware<MemorySessionStore> {
    SessionMiddleware::builder(store, key)
        .cookie_name("vina_session".to_string())
        .cookie_secure(secure)
        .cookie_http_only(true)
        .cookie_same_site(SameSite::Lax)
        .session_lifecycle(BrowserSession::default().state_ttl(Duration::seconds(ttl_secs)))
        .build()
}

/// Periodically drop expired sessions and idle token records.
pub fn spawn_cleanup(store: MemorySessionStore, manager: actix_web::web::Data<CsrfManager>, ttl_secs: i64) {
    actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            let sessions = store.cleanup_expired();
            let records = manager
                .session_data()
                .cleanup_idle(std::time::Duration::from_secs(ttl_secs.max(0) as u64));
            if sessions > 0 || records > 0 {
                log::info!("Session cleanup: {sessions} sessions, {records} token records removed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[actix_web::test]
    async fn save_then_load_round_trips_server_side() {
        let store = MemorySessionStore::new();
        let key = store
            .save(state(&[("session_id", "\"abc\"")]), &Duration::minutes(5))
            .await
            .expect("save");
        assert_eq!(key.as_ref().len(), 64);

        let loaded = store.load(&key).await.expect("load").expect("present");
        assert_eq!(loaded.get("session_id").map(String::as_str), Some("\"abc\""));
        assert_eq!(store.session_count(), 1);
    }

    #[actix_web::test]
    async fn update_keeps_key_and_replaces_state() {
        let store = MemorySessionStore::new();
        let key = store.save(state(&[("a", "1")]), &Duration::minutes(5)).await.expect("save");
        let raw = key.as_ref().to_string();

        let updated = store
            .update(key, state(&[("a", "2")]), &Duration::minutes(5))
            .await
            .expect("update");
        assert_eq!(updated.as_ref(), raw);
        let loaded = store.load(&updated).await.expect("load").expect("present");
        assert_eq!(loaded["a"], "2");
    }

    #[actix_web::test]
    async fn deleted_key_is_not_resurrected() {
        let store = MemorySessionStore::new();
        let key = store.save(state(&[("a", "1")]), &Duration::minutes(5)).await.expect("save");
        let raw = key.as_ref().to_string();
        store.delete(&key).await.expect("delete");
        assert!(store.load(&key).await.expect("load").is_none());

        let fresh = store
            .update(key, state(&[("a", "2")]), &Duration::minutes(5))
            .await
            .expect("update");
        assert_ne!(fresh.as_ref(), raw);
    }

    #[actix_web::test]
    async fn expired_sessions_are_invisible_and_cleaned() {
        let store = MemorySessionStore::new();
        let key = store.save(state(&[("a", "1")]), &Duration::ZERO).await.expect("save");
        assert!(store.load(&key).await.expect("load").is_none());

        store.save(state(&[("b", "1")]), &Duration::ZERO).await.expect("save");
        store.save(state(&[("c", "1")]), &Duration::minutes(5)).await.expect("save");
        assert_eq!(store.cleanup_expired(), 1);
        assert_eq!(store.session_count(), 1);
    }
}
