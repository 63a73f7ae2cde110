use actix_web::{
    HttpRequest,
    http::{
        Uri, header,
        uri::{Authority, Scheme},
    },
};

use crate::errors::AppError;

/// Accept only script-issued requests whose `Origin` (or `Referer`) names this host.
pub fn require_same_origin_ajax(req: &HttpRequest) -> Result<(), AppError> {
    let ajax = header_str(req, "X-Requested-With")
        .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"));
    if !ajax {
        log::debug!("Refresh without X-Requested-With from {:?}", req.peer_addr());
        return Err(AppError::OriginRejected);
    }

    let Some(host) = request_host(req) else {
        return Err(AppError::OriginRejected);
    };
    let source = header_str(req, header::ORIGIN.as_str())
        .or_else(|| header_str(req, header::REFERER.as_str()));

    match source {
        Some(source) if same_origin(source, &host) => Ok(()),
        other => {
            log::warn!("Cross-origin refresh from {other:?}, host {host}");
            Err(AppError::OriginRejected)
        }
    }
}

fn header_str<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn request_host(req: &HttpRequest) -> Option<String> {
    header_str(req, header::HOST.as_str())
        .map(String::from)
        .or_else(|| req.uri().authority().map(|a| a.as_str().to_string()))
}

/// Whether the absolute URL `source` points at `host`.
///
/// Hosts compare case-insensitively and an omitted port stands for the
/// default port of the source's scheme, so `https://vina.network:443`
/// matches `Host: vina.network`.
pub fn same_origin(source: &str, host: &str) -> bool {
    let Ok(uri) = source.parse::<Uri>() else {
        return false;
    };
    let (Some(scheme), Some(source_host)) = (uri.scheme(), uri.host()) else {
        return false;
    };
    let Ok(target) = host.parse::<Authority>() else {
        return false;
    };
    let Some(default_port) = default_port(scheme) else {
        return false;
    };

    let source_port = uri.port_u16().unwrap_or(default_port);
    let target_port = target.port_u16().unwrap_or(default_port);
    source_host.eq_ignore_ascii_case(target.host()) && source_port == target_port
}

fn default_port(scheme: &Scheme) -> Option<u16> {
    if *scheme == Scheme::HTTPS {
        Some(443)
    } else if *scheme == Scheme::HTTP {
        Some(80)
    } else {
        None
    }
}
