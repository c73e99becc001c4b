//! Web server module for headless server mode.
//!
//! Exposes the `Runtime`'s metrics, queue, and proxy state over a small
//! REST API, plus static file serving for an optional dashboard build.

pub mod auth;
pub mod routes;

use std::sync::Arc;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::runtime::Runtime;

/// Build the complete axum router with API routes and static file serving.
pub fn build_router(runtime: Arc<Runtime>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = routes::api_router(runtime);

    Router::new()
        .nest("/api", api_routes)
        .fallback_service(ServeDir::new("dist").append_index_html_on_directories(true))
        .layer(axum::middleware::from_fn(auth::basic_auth_middleware))
        .layer(cors)
}

/// Start the web server on the given port.
pub async fn start_server(runtime: Arc<Runtime>, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_router(runtime);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Web server listening on http://0.0.0.0:{}", port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
