//! Shared test infrastructure for HTTP-level CSRF tests.
//!
//! - `csrf_app!` builds the production route set behind the server-side
//!   session middleware and the CSRF guard, plus a few mutating test routes.
//! - `CookieJar` carries cookies between requests the way a browser would.

#![allow(dead_code)]

use std::collections::HashMap;

use actix_web::{HttpResponse, cookie::Cookie, dev::ServiceResponse, test::TestRequest, web};
use serde::Deserialize;

pub const CSRF_COOKIE: &str = "csrf_token_cookie";
pub const SESSION_COOKIE: &str = "vina_session";
pub const HOST: &str = "vina.network";

/// Build the application under test around a `web::Data<CsrfManager>` and,
/// optionally, the session store it should use.
macro_rules! csrf_app {
    ($manager:expr) => {
        csrf_app!($manager, vina::auth::store::MemorySessionStore::new())
    };
    ($manager:expr, $store:expr) => {
        actix_web::App::new()
            .wrap(actix_web::middleware::from_fn(
                vina::auth::middleware::protect_mutating_request,
            ))
            .wrap(vina::auth::store::session_middleware(
                $store.clone(),
                actix_web::cookie::Key::generate(),
                false,
                vina::config::DEFAULT_SESSION_TTL_SECS,
            ))
            .app_data($manager.clone())
            .configure(vina::handlers::configure)
            .route("/submit", actix_web::web::post().to($crate::common::submit))
            .route("/wallet", actix_web::web::post().to($crate::common::submit_wallet))
    };
}

pub async fn submit() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "success" }))
}

#[derive(Deserialize)]
pub struct WalletForm {
    pub wallet: String,
}

/// Echoes a form field, proving the guard left the body readable.
pub async fn submit_wallet(form: web::Form<WalletForm>) -> HttpResponse {
    HttpResponse::Ok().body(form.wallet.clone())
}

#[derive(Clone, Default)]
pub struct CookieJar {
    cookies: HashMap<String, Cookie<'static>>,
}

impl CookieJar {
    pub fn store<B>(&mut self, resp: &ServiceResponse<B>) {
        for cookie in resp.response().cookies() {
            if cookie.value().is_empty() {
                self.cookies.remove(cookie.name());
            } else {
                self.cookies.insert(cookie.name().to_string(), cookie.into_owned());
            }
        }
    }

    pub fn apply(&self, mut req: TestRequest) -> TestRequest {
        for cookie in self.cookies.values() {
            req = req.cookie(cookie.clone());
        }
        req
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|c| c.value())
    }
}

/// The CSRF cookie value set on `resp`, if any.
pub fn csrf_cookie<B>(resp: &ServiceResponse<B>) -> Option<String> {
    resp.response()
        .cookies()
        .find(|c| c.name() == CSRF_COOKIE)
        .map(|c| c.value().to_string())
}
