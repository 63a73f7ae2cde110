use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    /// The session store could not be read or written.
    SessionUnavailable(String),
    /// No token stored, or the stored one is past its TTL.
    TokenMissingOrExpired,
    /// A token was submitted but does not equal the stored one.
    TokenMismatch,
    /// Cross-origin or non-AJAX refresh attempt.
    OriginRejected,
    /// The entropy source failed while generating a token.
    RandomnessFailure(String),
    UnknownAction(String),
    /// Application data expected by a handler or middleware was not registered.
    MissingState(&'static str),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::SessionUnavailable(e) => write!(f, "Session unavailable: {e}"),
            AppError::TokenMissingOrExpired => write!(f, "CSRF token missing or expired"),
            AppError::TokenMismatch => write!(f, "CSRF token mismatch"),
            AppError::OriginRejected => write!(f, "Request origin rejected"),
            AppError::RandomnessFailure(e) => write!(f, "Randomness failure: {e}"),
            AppError::UnknownAction(a) => write!(f, "Unknown action: {a}"),
            AppError::MissingState(name) => write!(f, "Missing application state: {name}"),
        }
    }
}

impl std::error::Error for AppError {}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::TokenMissingOrExpired | AppError::TokenMismatch | AppError::OriginRejected => {
                StatusCode::FORBIDDEN
            }
            AppError::UnknownAction(_) => StatusCode::BAD_REQUEST,
            AppError::SessionUnavailable(_)
            | AppError::RandomnessFailure(_)
            | AppError::MissingState(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Client bodies never say which token check failed.
        let message = match self {
            AppError::TokenMissingOrExpired | AppError::TokenMismatch => {
                log::warn!("{self}");
                "Invalid CSRF token"
            }
            AppError::OriginRejected => {
                log::warn!("{self}");
                "Invalid request"
            }
            AppError::UnknownAction(_) => "Unknown action",
            _ => {
                log::error!("{self}");
                "Internal server error"
            }
        };
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "status": "error",
            "message": message,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let resp = err.error_response();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body()).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json"))
    }

    #[actix_web::test]
    async fn token_failures_share_a_generic_403() {
        let (status, a) = body_json(AppError::TokenMissingOrExpired).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (_, b) = body_json(AppError::TokenMismatch).await;
        assert_eq!(a, b);
        assert_eq!(a["message"], "Invalid CSRF token");
    }

    #[actix_web::test]
    async fn origin_rejection_is_invalid_request() {
        let (status, body) = body_json(AppError::OriginRejected).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, serde_json::json!({"status": "error", "message": "Invalid request"}));
    }

    #[actix_web::test]
    async fn server_failures_hide_details() {
        let (status, body) = body_json(AppError::RandomnessFailure("os rng gone".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");

        let (status, _) = body_json(AppError::SessionUnavailable("corrupt".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
