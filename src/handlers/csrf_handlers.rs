use actix_session::Session;
use actix_web::{HttpRequest, HttpResponse, web};
use serde::Deserialize;

use crate::auth::{csrf::CsrfManager, origin};
use crate::errors::AppError;

#[derive(Deserialize)]
pub struct CsrfQuery {
    pub action: Option<String>,
}

/// `GET /csrf?action=refresh`: hand a same-origin script a fresh token.
pub async fn refresh(
    req: HttpRequest,
    session: Session,
    query: web::Query<CsrfQuery>,
    manager: web::Data<CsrfManager>,
) -> Result<HttpResponse, AppError> {
    match query.action.as_deref() {
        Some("refresh") => {}
        other => return Err(AppError::UnknownAction(other.unwrap_or_default().to_string())),
    }
    origin::require_same_origin_ajax(&req)?;

    let ctx = manager.ensure_session(&session)?;
    let _guard = manager.lock_session(&ctx).await;
    let token = manager.regenerate_token(&ctx)?;
    let cookie = manager.issue_cookie(&ctx, Some(token.as_str()))?;
    log::debug!("Refreshed CSRF token for session {}", ctx.id());

    Ok(HttpResponse::Ok().cookie(cookie).json(serde_json::json!({
        "status": "success",
        "csrf_token": token,
        "expires_in": manager.settings().ttl_secs,
    })))
}
