//! Runtime configuration: environment variables plus an on-disk JSON
//! sidecar.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

fn env_flag(key: &str) -> bool {
    std::env::var(key).map(|v| matches!(v.as_str(), "1" | "true" | "yes")).unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub proxy_enabled: bool,
    pub proxy_list_file: Option<String>,
    pub max_concurrent_browsers: usize,
    pub default_timeout_secs: u64,
    pub log_level: String,
    pub log_dir: Option<String>,
    pub vulnerability_report_dir: Option<String>,
    pub redis_host: Option<String>,
    pub redis_port: Option<u16>,
    #[serde(skip_serializing)]
    pub redis_password: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            proxy_enabled: env_flag("PROXY_ENABLED"),
            proxy_list_file: std::env::var("PROXY_LIST_FILE").ok(),
            max_concurrent_browsers: env_parse("MAX_CONCURRENT_BROWSERS", 5usize),
            default_timeout_secs: env_parse("DEFAULT_TIMEOUT", 30u64),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_dir: std::env::var("LOG_DIR").ok(),
            vulnerability_report_dir: std::env::var("VULNERABILITY_REPORT_DIR").ok(),
            redis_host: std::env::var("REDIS_HOST").ok(),
            redis_port: std::env::var("REDIS_PORT").ok().and_then(|p| p.parse().ok()),
            redis_password: std::env::var("REDIS_PASSWORD").ok(),
        }
    }
}

impl AppConfig {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("navigator-orchestrator").join("config.json"))
    }

    /// Environment variables take precedence; any option not set in the
    /// environment falls back to the last saved on-disk value.
    pub fn load() -> Self {
        let env_config = Self::default();
        let Some(path) = Self::config_path() else {
            return env_config;
        };
        if !path.exists() {
            return env_config;
        }

        match std::fs::read_to_string(&path).ok().and_then(|c| serde_json::from_str::<AppConfig>(&c).ok()) {
            Some(saved) => {
                info!(path = %path.display(), "loaded saved config");
                Self {
                    proxy_enabled: env_config.proxy_enabled || saved.proxy_enabled,
                    proxy_list_file: env_config.proxy_list_file.or(saved.proxy_list_file),
                    max_concurrent_browsers: env_config.max_concurrent_browsers,
                    default_timeout_secs: env_config.default_timeout_secs,
                    log_level: env_config.log_level,
                    log_dir: env_config.log_dir.or(saved.log_dir),
                    vulnerability_report_dir: env_config.vulnerability_report_dir.or(saved.vulnerability_report_dir),
                    redis_host: env_config.redis_host.or(saved.redis_host),
                    redis_port: env_config.redis_port.or(saved.redis_port),
                    redis_password: env_config.redis_password,
                }
            }
            None => {
                warn!(path = %path.display(), "config file present but unreadable, using environment/defaults");
                env_config
            }
        }
    }

    pub fn save(&self) {
        let Some(path) = Self::config_path() else { return };
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!(error = %e, "failed to create config directory");
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(content) => {
                if let Err(e) = std::fs::write(&path, content) {
                    error!(error = %e, "failed to save config");
                } else {
                    info!(path = %path.display(), "config saved");
                }
            }
            Err(e) => error!(error = %e, "failed to serialize config"),
        }
    }
}

pub fn log_dir() -> Option<PathBuf> {
    std::env::var("LOG_DIR")
        .map(PathBuf::from)
        .ok()
        .or_else(|| dirs::config_dir().map(|p| p.join("navigator-orchestrator").join("logs")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_respects_explicit_env_flag() {
        std::env::set_var("PROXY_ENABLED", "true");
        let cfg = AppConfig::default();
        assert!(cfg.proxy_enabled);
        std::env::remove_var("PROXY_ENABLED");
    }

    #[test]
    fn max_concurrent_browsers_falls_back_to_default() {
        std::env::remove_var("MAX_CONCURRENT_BROWSERS");
        let cfg = AppConfig::default();
        assert_eq!(cfg.max_concurrent_browsers, 5);
    }
}
