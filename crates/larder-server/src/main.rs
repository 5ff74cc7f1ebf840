use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use larder_api::auth::{self, AppState, AppStateInner};
use larder_api::middleware::require_auth;
use larder_api::{images, partners, recipes, sync};
use larder_remote::{DEFAULT_API_BASE, RemoteClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "larder=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("LARDER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("LARDER_DB_PATH").unwrap_or_else(|_| "larder.db".into());
    let api_base = std::env::var("LARDER_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.into());
    let host = std::env::var("LARDER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("LARDER_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = larder_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        remote: RemoteClient::new(api_base),
        jwt_secret,
    });

    // Routes
    let public_routes = Router::new()
        .route("/api/user/login", post(auth::login))
        .route("/image/recipe/{id}/photo/{hash}/{name}", get(images::recipe_main_photo))
        .route("/image/recipe/{id}/photos/{pid}/{hash}/{name}", get(images::recipe_photo))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/api/user/me", get(auth::me))
        .route("/api/user/refresh", post(sync::refresh_account))
        .route("/api/categories", get(recipes::list_categories))
        .route("/api/recipes", get(recipes::list_recipes))
        .route("/api/recipes/{id}", get(recipes::get_recipe))
        .route("/api/partners", get(partners::list_partners))
        .route("/api/partners", post(partners::request_partner))
        .route("/api/partners/{id}/approve", post(partners::approve_partner))
        .route("/api/partners/{id}", delete(partners::remove_active_partner))
        .route("/api/partners/pending/{id}", delete(partners::remove_pending_partner))
        .route("/api/partners/{id}/copy", post(sync::copy_from_partner))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Larder server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
