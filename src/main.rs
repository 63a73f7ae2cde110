use actix_web::{App, HttpServer, middleware, web};

use vina::auth::{
    csrf::CsrfManager,
    middleware::protect_mutating_request,
    store::{MemorySessionStore, session_middleware, spawn_cleanup},
};
use vina::config::AppConfig;
use vina::handlers;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let config = AppConfig::from_env();
    let secure = config.csrf.secure;
    let session_key = config.session_key.clone();
    let session_ttl = config.session_ttl_secs;
    let manager = web::Data::new(CsrfManager::new(config.csrf.clone()));
    let store = MemorySessionStore::new();
    spawn_cleanup(store.clone(), manager.clone(), session_ttl);

    log::info!(
        "Starting server at {} (csrf ttl {}s, secure cookies {})",
        config.bind_addr,
        config.csrf.ttl_secs,
        secure
    );

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::from_fn(protect_mutating_request))
            .wrap(session_middleware(store.clone(), session_key.clone(), secure, session_ttl))
            .wrap(middleware::Logger::default())
            .app_data(manager.clone())
            .configure(handlers::configure)
            .default_service(web::to(|| async {
                actix_web::HttpResponse::NotFound().json(serde_json::json!({
                    "status": "error",
                    "message": "Not found",
                }))
            }))
    })
    .bind(&config.bind_addr)?
    .run()
    .await
}
