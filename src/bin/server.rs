//! Navigator Orchestrator - standalone web server
//!
//! Runs the worker pool with a web dashboard accessible via browser.
//!
//! Environment variables:
//! - `ORCHESTRATOR_WEB_PORT` - Server port (default: 8080)
//! - `ORCHESTRATOR_WEB_USER` - Basic auth username (default: "admin")
//! - `ORCHESTRATOR_WEB_PASS` - Basic auth password (auth disabled if not set)

use std::sync::Arc;
use tracing::info;

use orchestrator_lib::config::AppConfig;
use orchestrator_lib::runtime::Runtime;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = orchestrator_lib::init_logging();

    info!("Starting Navigator Orchestrator (server mode)");

    if let Some(dir) = orchestrator_lib::log_dir() {
        info!("Log files saved to: {}", dir.display());
    }

    let port: u16 = std::env::var("ORCHESTRATOR_WEB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    if std::env::var("ORCHESTRATOR_WEB_PASS").map(|p| !p.is_empty()).unwrap_or(false) {
        let user = std::env::var("ORCHESTRATOR_WEB_USER").unwrap_or_else(|_| "admin".to_string());
        info!("Basic auth enabled (user: {})", user);
    } else {
        info!("Basic auth disabled (set ORCHESTRATOR_WEB_PASS to enable)");
    }

    let config = AppConfig::load();
    let runtime = Arc::new(Runtime::new(config));
    runtime.start();

    info!("Dashboard: http://0.0.0.0:{}", port);
    orchestrator_lib::web::start_server(runtime, port).await?;

    Ok(())
}
