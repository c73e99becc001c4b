//! Navigator Orchestrator
//!
//! A headless-browser navigation orchestrator: rate limiting, proxy
//! rotation, session pooling, identity assembly, detection
//! classification, a priority task queue, and a worker pool that drains
//! it — plus security-test and stress-test driver modes.

pub mod error;
pub mod proxy;
pub mod browser;
pub mod rate;
pub mod identity;
pub mod session;
pub mod detection;
pub mod queue;
pub mod worker;
pub mod metrics;
pub mod security;
pub mod runtime;
pub mod config;
pub mod cli;
pub mod web;

use std::path::PathBuf;

/// Log directory, shared between the CLI and server entrypoints.
pub fn log_dir() -> Option<PathBuf> {
    config::log_dir()
}

/// Initialize logging: console output plus a daily-rolling file layer
/// when a log directory is resolvable.
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "navigator-orchestrator.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}
