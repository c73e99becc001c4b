//! Command-line surface: `test`, `stress`, `scrape`, `proxy`, `serve`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use crate::browser::{BrowserContext, ChromiumContext, LaunchOptions};
use crate::config::AppConfig;
use crate::detection;
use crate::identity::{IdentityAssembler, IdentityConfig};
use crate::proxy::{parse_proxy_list, to_driver_form};
use crate::runtime::Runtime;
use crate::security::{SecurityTestOptions, StressTestOptions};

#[derive(Parser, Debug)]
#[command(name = "orchestrator", version, about = "Headless-browser navigation orchestrator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a security test against a URL and report a bypass verdict.
    Test {
        url: String,
        #[arg(short = 'a', long, default_value_t = 5)]
        attempts: usize,
        #[arg(short = 'p', long)]
        use_proxies: bool,
        #[arg(short = 'b', long)]
        human_behavior: bool,
        #[arg(short = 'o', long)]
        output_dir: Option<PathBuf>,
    },
    /// Run a stress test against a URL and report raw throughput.
    Stress {
        url: String,
        #[arg(short = 'c', long, default_value_t = 5)]
        concurrent: usize,
        #[arg(short = 'r', long, default_value_t = 10)]
        requests: usize,
        #[arg(short = 'p', long)]
        use_proxies: bool,
    },
    /// Navigate to a URL, run a selector extraction, and print JSON.
    Scrape {
        url: String,
        #[arg(short = 's', long)]
        selector: String,
        #[arg(short = 'o', long)]
        output_file: Option<PathBuf>,
        #[arg(short = 'p', long)]
        use_proxies: bool,
        #[arg(short = 'b', long)]
        human_behavior: bool,
    },
    /// Load and optionally test a proxy list.
    Proxy {
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,
        #[arg(short = 't', long)]
        test: bool,
    },
    /// Start the worker pool and the metrics/queue/proxy HTTP API.
    Serve {
        #[arg(short = 'P', long, default_value_t = 8080)]
        port: u16,
    },
}

/// Dispatches the parsed command and returns the process exit code.
pub async fn run(cli: Cli) -> i32 {
    let config = AppConfig::load();

    match cli.command {
        Command::Test { url, attempts, use_proxies, human_behavior, output_dir } => {
            run_test(config, url, attempts, use_proxies, human_behavior, output_dir).await
        }
        Command::Stress { url, concurrent, requests, use_proxies } => {
            run_stress(config, url, concurrent, requests, use_proxies).await
        }
        Command::Scrape { url, selector, output_file, use_proxies, human_behavior } => {
            run_scrape(config, url, selector, output_file, use_proxies, human_behavior).await
        }
        Command::Proxy { file, test } => run_proxy(config, file, test).await,
        Command::Serve { port } => run_serve(config, port).await,
    }
}

async fn run_serve(config: AppConfig, port: u16) -> i32 {
    let runtime = Arc::new(Runtime::new(config));
    runtime.start();
    info!(port, "starting serve mode");
    match crate::web::start_server(runtime, port).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "web server failed");
            2
        }
    }
}

async fn run_test(
    mut config: AppConfig,
    url: String,
    attempts: usize,
    use_proxies: bool,
    human_behavior: bool,
    output_dir: Option<PathBuf>,
) -> i32 {
    config.proxy_enabled = config.proxy_enabled || use_proxies;
    let runtime = Arc::new(Runtime::new(config));

    let opts = SecurityTestOptions { url, attempts, use_proxies, human_behavior };
    match runtime.run_security_test(opts).await {
        Ok(report) => {
            let json = serde_json::to_string_pretty(&report).unwrap_or_default();
            println!("{json}");
            if let Some(dir) = output_dir {
                if let Err(e) = std::fs::create_dir_all(&dir) {
                    error!(error = %e, "failed to create output directory");
                } else {
                    let path = dir.join("security-report.json");
                    if let Err(e) = std::fs::write(&path, &json) {
                        error!(error = %e, "failed to write report");
                    } else {
                        info!(path = %path.display(), "report written");
                    }
                }
            }
            if report.bypass_success { 0 } else { 1 }
        }
        Err(e) => {
            error!(error = %e.to_string(), "security test failed");
            2
        }
    }
}

async fn run_stress(mut config: AppConfig, url: String, concurrent: usize, requests: usize, use_proxies: bool) -> i32 {
    config.proxy_enabled = config.proxy_enabled || use_proxies;
    let runtime = Arc::new(Runtime::new(config));

    let opts = StressTestOptions {
        url,
        concurrent_sessions: concurrent,
        requests_per_session: requests,
        use_proxies,
    };
    match runtime.run_stress_test(opts).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
            0
        }
        Err(e) => {
            error!(error = %e.to_string(), "stress test failed");
            2
        }
    }
}

async fn run_scrape(
    mut config: AppConfig,
    url: String,
    selector: String,
    output_file: Option<PathBuf>,
    use_proxies: bool,
    _human_behavior: bool,
) -> i32 {
    config.proxy_enabled = config.proxy_enabled || use_proxies;
    let runtime = Runtime::new(config);

    let identity = IdentityAssembler::assemble(&IdentityConfig::all_randomized());
    let proxy = if use_proxies { runtime.proxies.as_ref().and_then(|p| p.best()) } else { None };
    let launch_opts = LaunchOptions {
        headless: true,
        chrome_path: None,
        user_data_dir: None,
        proxy: proxy.as_ref().map(to_driver_form),
        timeout_secs: runtime.config.default_timeout_secs,
    };

    let context = match ChromiumContext::launch(&identity, launch_opts).await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e.to_string(), "failed to launch browser");
            return 2;
        }
    };

    if let Err(e) = context.navigate(&url).await {
        error!(error = %e.to_string(), "navigation failed");
        return 2;
    }

    let detections = detection::classify(&context, &url).await;
    if detection::has_block(&detections) {
        error!("request blocked before extraction could run");
        let _ = context.close().await;
        return 2;
    }

    let script = format!(
        "Array.from(document.querySelectorAll({sel:?})).map(e => e.textContent)",
        sel = selector
    );
    let extracted = match context.evaluate(&script).await {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e.to_string(), "extraction failed");
            let _ = context.close().await;
            return 2;
        }
    };
    let _ = context.close().await;

    let json = serde_json::to_string_pretty(&extracted).unwrap_or_default();
    match output_file {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, &json) {
                error!(error = %e, "failed to write output file");
                return 2;
            }
            info!(path = %path.display(), "extraction written");
        }
        None => println!("{json}"),
    }
    0
}

async fn run_proxy(_config: AppConfig, file: Option<PathBuf>, test: bool) -> i32 {
    let Some(path) = file else {
        error!("proxy command requires --file");
        return 2;
    };
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to read proxy list file");
            return 2;
        }
    };
    let proxies = parse_proxy_list(&contents);
    info!(count = proxies.len(), "parsed proxy list");

    if test {
        for proxy in &proxies {
            let proxy_url = format!("{}://{}:{}", "http", proxy.host, proxy.port);
            let client = reqwest::Proxy::all(&proxy_url)
                .ok()
                .and_then(|p| reqwest::Client::builder().proxy(p).timeout(std::time::Duration::from_secs(10)).build().ok());

            let reachable = match client {
                Some(c) => c.get("https://httpbin.org/ip").send().await.is_ok(),
                None => false,
            };
            info!(proxy = %proxy.key(), reachable, "proxy test");
        }
    }

    println!("{}", serde_json::to_string_pretty(&proxies).unwrap_or_default());
    0
}
