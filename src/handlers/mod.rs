pub mod auth_handlers;
pub mod csrf_handlers;

use actix_web::web;

/// Configure the session and token routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(auth_handlers::index))
        .route("/csrf", web::get().to(csrf_handlers::refresh))
        .route("/logout", web::post().to(auth_handlers::logout));
}
