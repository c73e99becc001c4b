//! Security-test and stress-test driver modes: synthesize tasks against
//! a single URL and aggregate detections into a verdict or raw
//! throughput numbers.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::detection::{self, Detection, DetectionKind};
use crate::identity::{IdentityAssembler, IdentityConfig};
use crate::proxy::{to_driver_form, ProxyPool};
use crate::browser::{BrowserContext, BrowserError, ChromiumContext, LaunchOptions};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vulnerability {
    pub severity: String,
    pub title: String,
    pub category: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityTestReport {
    pub bypass_success: bool,
    pub detection_rate: f64,
    pub vulnerabilities: Vec<Vulnerability>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityTestOptions {
    pub url: String,
    pub attempts: usize,
    pub use_proxies: bool,
    pub human_behavior: bool,
}

/// Run `opts.attempts` sequential attempts, each a fresh session, and
/// derive a vulnerability verdict from the aggregated detections.
pub async fn run_security_test(
    opts: SecurityTestOptions,
    proxies: Option<Arc<ProxyPool>>,
) -> Result<SecurityTestReport, BrowserError> {
    let mut per_attempt: Vec<Vec<Detection>> = Vec::with_capacity(opts.attempts);

    for _ in 0..opts.attempts {
        let identity = IdentityAssembler::assemble(&IdentityConfig::all_randomized());
        let proxy = if opts.use_proxies {
            proxies.as_ref().and_then(|p| p.best())
        } else {
            None
        };
        let launch_opts = LaunchOptions {
            headless: true,
            chrome_path: None,
            user_data_dir: None,
            proxy: proxy.as_ref().map(to_driver_form),
            timeout_secs: 60,
        };

        let context = ChromiumContext::launch(&identity, launch_opts).await?;
        context.navigate(&opts.url).await?;
        let detections = detection::classify(&context, &opts.url).await;
        let _ = context.close().await;

        per_attempt.push(detections);
    }

    Ok(synthesize_report(&per_attempt))
}

fn synthesize_report(per_attempt: &[Vec<Detection>]) -> SecurityTestReport {
    let total = per_attempt.len().max(1);
    let bypass_success = per_attempt.iter().any(|d| !detection::has_block(d));
    let with_detections = per_attempt.iter().filter(|d| !d.is_empty()).count();
    let detection_rate = with_detections as f64 / total as f64;

    let block_count = per_attempt.iter().filter(|d| d.iter().any(|x| x.kind == DetectionKind::Block)).count();
    let captcha_count = per_attempt
        .iter()
        .filter(|d| d.iter().any(|x| x.kind == DetectionKind::Captcha))
        .count();
    let any_detected = per_attempt.iter().any(|d| !d.is_empty());

    let mut vulnerabilities = Vec::new();
    let mut recommendations = Vec::new();

    if !any_detected {
        vulnerabilities.push(Vulnerability {
            severity: "critical".to_string(),
            title: "No Bot Detection Mechanisms Found".to_string(),
            category: "Bot Detection".to_string(),
            description: "None of the attempts triggered any classifier.".to_string(),
        });
        recommendations.push("Deploy a bot-detection layer (challenge or fingerprinting).".to_string());
    } else if block_count == per_attempt.len() && captcha_count == 0 {
        vulnerabilities.push(Vulnerability {
            severity: "high".to_string(),
            title: "IP-Only Blocking".to_string(),
            category: "Bot Detection".to_string(),
            description: "Every attempt was blocked with no secondary challenge; blocking relies solely on IP reputation.".to_string(),
        });
        recommendations.push("Layer a behavioral or device-fingerprint challenge behind IP blocking.".to_string());
    } else if captcha_count == per_attempt.len() && block_count == 0 {
        vulnerabilities.push(Vulnerability {
            severity: "medium".to_string(),
            title: "CAPTCHA-Only Defense".to_string(),
            category: "Bot Detection".to_string(),
            description: "Every attempt surfaced a CAPTCHA with no outright block, suggesting no rate-based defense.".to_string(),
        });
        recommendations.push("Add IP/session rate limiting in front of the CAPTCHA challenge.".to_string());
    }

    SecurityTestReport {
        bypass_success,
        detection_rate,
        vulnerabilities,
        recommendations,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StressTestOptions {
    pub url: String,
    pub concurrent_sessions: usize,
    pub requests_per_session: usize,
    pub use_proxies: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StressTestReport {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// `(wallClockEnd - wallClockStart) / totalRequests`. Preserved
    /// deliberately: this includes session-spawn overhead, not just
    /// per-request latency.
    pub avg_response_time_ms: f64,
}

pub async fn run_stress_test(
    opts: StressTestOptions,
    proxies: Option<Arc<ProxyPool>>,
) -> Result<StressTestReport, BrowserError> {
    let started = Instant::now();
    let total_requests = (opts.concurrent_sessions * opts.requests_per_session) as u64;
    let successful = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let failed = Arc::new(std::sync::atomic::AtomicU64::new(0));

    let mut handles = Vec::with_capacity(opts.concurrent_sessions);
    for _ in 0..opts.concurrent_sessions {
        let url = opts.url.clone();
        let requests = opts.requests_per_session;
        let use_proxies = opts.use_proxies;
        let proxies = proxies.clone();
        let successful = successful.clone();
        let failed = failed.clone();

        handles.push(tokio::spawn(async move {
            let identity = IdentityAssembler::assemble(&IdentityConfig::all_randomized());
            let proxy = if use_proxies {
                proxies.as_ref().and_then(|p| p.best())
            } else {
                None
            };
            let launch_opts = LaunchOptions {
                headless: true,
                chrome_path: None,
                user_data_dir: None,
                proxy: proxy.as_ref().map(to_driver_form),
                timeout_secs: 60,
            };

            let context = match ChromiumContext::launch(&identity, launch_opts).await {
                Ok(c) => c,
                Err(_) => {
                    failed.fetch_add(requests as u64, std::sync::atomic::Ordering::Relaxed);
                    return;
                }
            };

            for _ in 0..requests {
                match context.navigate(&url).await {
                    Ok(_) => {
                        successful.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }
                    Err(_) => {
                        failed.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }
                }
            }
            let _ = context.close().await;
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed_ms = started.elapsed().as_millis() as f64;
    let avg_response_time_ms = elapsed_ms / total_requests.max(1) as f64;

    Ok(StressTestReport {
        total_requests,
        successful_requests: successful.load(std::sync::atomic::Ordering::Relaxed),
        failed_requests: failed.load(std::sync::atomic::Ordering::Relaxed),
        avg_response_time_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(kind: DetectionKind) -> Detection {
        Detection {
            kind,
            url: "http://example.com".into(),
            timestamp: 0,
            details: String::new(),
            evidence: None,
        }
    }

    #[test]
    fn no_detections_yields_critical_vulnerability() {
        let per_attempt = vec![vec![], vec![], vec![], vec![], vec![]];
        let report = synthesize_report(&per_attempt);
        assert!(report.bypass_success);
        assert_eq!(report.vulnerabilities.len(), 1);
        assert_eq!(report.vulnerabilities[0].title, "No Bot Detection Mechanisms Found");
        assert_eq!(report.vulnerabilities[0].severity, "critical");
    }

    #[test]
    fn all_blocked_yields_ip_only_blocking_and_zero_bypass() {
        let per_attempt: Vec<Vec<Detection>> = (0..5).map(|_| vec![detection(DetectionKind::Block)]).collect();
        let report = synthesize_report(&per_attempt);
        assert!(!report.bypass_success);
        assert_eq!(report.detection_rate, 1.0);
        assert_eq!(report.vulnerabilities[0].category, "Bot Detection");
        assert_eq!(report.vulnerabilities[0].title, "IP-Only Blocking");
    }

    #[test]
    fn captcha_only_yields_medium_severity() {
        let per_attempt: Vec<Vec<Detection>> = (0..5).map(|_| vec![detection(DetectionKind::Captcha)]).collect();
        let report = synthesize_report(&per_attempt);
        assert_eq!(report.vulnerabilities[0].severity, "medium");
        assert_eq!(report.vulnerabilities[0].title, "CAPTCHA-Only Defense");
    }
}
