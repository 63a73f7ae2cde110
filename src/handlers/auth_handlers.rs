use actix_session::Session;
use actix_web::{HttpResponse, web};

use crate::auth::csrf::CsrfManager;
use crate::errors::AppError;

/// Landing page: starts the session and embeds its token for forms and scripts.
pub async fn index(
    session: Session,
    manager: web::Data<CsrfManager>,
) -> Result<HttpResponse, AppError> {
    let ctx = manager.ensure_session(&session)?;
    let _guard = manager.lock_session(&ctx).await;
    let token = manager.generate_token(&ctx)?;
    let cookie = manager.issue_cookie(&ctx, Some(token.as_str()))?;

    let field = &manager.settings().field_name;
    let html = format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="csrf-token" content="{token}">
<title>Vina Network</title>
</head>
<body>
<form method="post" action="/logout">
<input type="hidden" name="{field}" value="{token}">
<button type="submit">Log out</button>
</form>
</body>
</html>
"#
    );

    Ok(HttpResponse::Ok()
        .cookie(cookie)
        .content_type("text/html; charset=utf-8")
        .body(html))
}

/// Ends the session. Reached only through the CSRF guard.
pub async fn logout(
    session: Session,
    manager: web::Data<CsrfManager>,
) -> Result<HttpResponse, AppError> {
    let ctx = manager.ensure_session(&session)?;
    let guard = manager.lock_session(&ctx).await;
    manager.end_session(ctx, guard, &session);

    Ok(HttpResponse::SeeOther()
        .insert_header(("Location", "/"))
        .cookie(manager.removal_cookie())
        .finish())
}
