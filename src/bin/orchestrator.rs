//! CLI entrypoint: `test`, `stress`, `scrape`, `proxy` subcommands.

use clap::Parser;

#[tokio::main]
async fn main() {
    let _guard = orchestrator_lib::init_logging();
    let cli = orchestrator_lib::cli::Cli::parse();
    let code = orchestrator_lib::cli::run(cli).await;
    std::process::exit(code);
}
