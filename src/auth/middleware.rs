use actix_session::SessionExt;
use actix_web::{
    Error, ResponseError, web,
    body::MessageBody,
    dev::{Payload, ServiceRequest, ServiceResponse},
    http::{Method, header},
    middleware::Next,
};
use std::collections::HashMap;

use crate::auth::csrf::CsrfManager;
use crate::errors::AppError;

/// Middleware function guarding POST requests with the session's CSRF token.
///
/// The token is read from the `csrf_token` body field (urlencoded, multipart
/// or JSON), then from the `X-CSRF-Token` header. A refused token ends the
/// request with 403. An accepted one is rotated before the handler runs and
/// the new value is mirrored into the CSRF cookie on the response.
pub async fn protect_mutating_request(
    mut req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    if req.method() != Method::POST {
        return next.call(req).await.map(|res| res.map_into_left_body());
    }

    let Some(manager) = req.app_data::<web::Data<CsrfManager>>().cloned() else {
        let response = AppError::MissingState("CsrfManager").error_response();
        return Ok(req.into_response(response).map_into_right_body());
    };

    let candidate = extract_candidate(&mut req, &manager).await?;

    let rotated = {
        let ctx = match manager.ensure_session(&req.get_session()) {
            Ok(ctx) => ctx,
            Err(err) => return Ok(req.into_response(err.error_response()).map_into_right_body()),
        };
        let _guard = manager.lock_session(&ctx).await;
        match manager.verify_and_rotate(&ctx, &candidate) {
            Ok(token) => token,
            Err(err) => {
                log::debug!("Refused {} {} for session {}", req.method(), req.path(), ctx.id());
                return Ok(req.into_response(err.error_response()).map_into_right_body());
            }
        }
    };

    let cookie = manager.cookie_for(rotated);
    let mut res = next.call(req).await?;
    // Handlers that set the cookie themselves (logout) win.
    let already_set = res.response().cookies().any(|c| c.name() == cookie.name());
    if !already_set {
        if let Err(e) = res.response_mut().add_cookie(&cookie) {
            log::warn!("Failed to set CSRF cookie: {e}");
        }
    }
    Ok(res.map_into_left_body())
}

/// Body field first, then header. Empty when neither carries a token.
async fn extract_candidate(req: &mut ServiceRequest, manager: &CsrfManager) -> Result<String, Error> {
    let settings = manager.settings();

    let body = req.extract::<web::Bytes>().await?;
    // Put the body back for the handler's own extractors.
    req.set_payload(Payload::from(body.clone()));

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let from_body = token_from_body(content_type, &body, &settings.field_name);
    if let Some(token) = from_body.filter(|t| !t.is_empty()) {
        return Ok(token);
    }

    Ok(req
        .headers()
        .get(settings.header_name.as_str())
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default())
}

fn token_from_body(content_type: &str, body: &[u8], field: &str) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    let mime: mime::Mime = content_type.parse().ok()?;
    // Type and subtype come back lowercased.
    match mime.essence_str() {
        "application/x-www-form-urlencoded" => {
            let mut fields: HashMap<String, String> = serde_urlencoded::from_bytes(body).ok()?;
            fields.remove(field)
        }
        "application/json" => {
            let value: serde_json::Value = serde_json::from_slice(body).ok()?;
            value.get(field).and_then(|v| v.as_str()).map(String::from)
        }
        "multipart/form-data" => {
            let boundary = mime.get_param(mime::BOUNDARY)?;
            multipart_field(body, boundary.as_str(), field)
        }
        _ => None,
    }
}

/// Text value of the first multipart part named `field`.
fn multipart_field(body: &[u8], boundary: &str, field: &str) -> Option<String> {
    let body = String::from_utf8_lossy(body);
    let delimiter = format!("--{boundary}");

    for part in body.split(delimiter.as_str()).skip(1) {
        if part.starts_with("--") {
            break;
        }
        let part = part.strip_prefix("\r\n").unwrap_or(part);
        let Some((headers, value)) = part.split_once("\r\n\r\n") else {
            continue;
        };
        let named = headers.lines().any(|line| {
            let Some((name, disposition)) = line.split_once(':') else {
                return false;
            };
            name.trim().eq_ignore_ascii_case("content-disposition") && disposition_name(disposition) == Some(field)
        });
        if named {
            return Some(value.strip_suffix("\r\n").unwrap_or(value).to_string());
        }
    }
    None
}

/// `name` parameter of a `form-data` Content-Disposition value.
fn disposition_name(value: &str) -> Option<&str> {
    value.split(';').skip(1).find_map(|param| {
        let (key, val) = param.split_once('=')?;
        key.trim().eq_ignore_ascii_case("name").then(|| val.trim().trim_matches('"'))
    })
}
