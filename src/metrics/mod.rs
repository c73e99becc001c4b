//! Metrics & health: sliding-window request/detection logs, trend
//! computation, threshold-based health signal, and alert dispatch.

mod alert;

pub use alert::{AlertSeverity, Alerting};

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::detection::{Detection, DetectionKind};

const DEFAULT_MAX_HISTORY: usize = 10_000;
const DEFAULT_MAX_DETECTIONS: usize = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLog {
    pub ts: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub blocked: bool,
    pub captcha: bool,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RequestCounts {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub blocked: u64,
    pub captcha: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStats {
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub rps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSummary {
    pub total: usize,
    pub by_kind: HashMap<String, usize>,
    pub recent: Vec<Detection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub requests: RequestCounts,
    pub performance: PerformanceStats,
    pub detections: DetectionSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendBucket {
    pub start: DateTime<Utc>,
    pub rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthThresholds {
    pub min_success_rate: f64,
    pub max_detection_rate: f64,
    pub max_avg_ms: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_success_rate: 0.8,
            max_detection_rate: 0.3,
            max_avg_ms: 5000.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub issues: Vec<String>,
}

struct Inner {
    requests: VecDeque<RequestLog>,
    detections: VecDeque<Detection>,
    max_history: usize,
    max_detections: usize,
}

/// Append-only sliding-window logs with FIFO eviction past `maxHistory`.
pub struct Metrics {
    inner: RwLock<Inner>,
    pub alerting: Alerting,
}

impl Metrics {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_HISTORY, DEFAULT_MAX_DETECTIONS)
    }

    pub fn with_capacity(max_history: usize, max_detections: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                requests: VecDeque::new(),
                detections: VecDeque::new(),
                max_history,
                max_detections,
            }),
            alerting: Alerting::new(),
        }
    }

    pub fn log_request(&self, log: RequestLog) {
        let mut inner = self.inner.write();
        if inner.requests.len() >= inner.max_history {
            inner.requests.pop_front();
        }
        inner.requests.push_back(log);
    }

    pub fn log_detection(&self, detection: Detection) {
        let mut inner = self.inner.write();
        if inner.detections.len() >= inner.max_detections {
            inner.detections.pop_front();
        }
        inner.detections.push_back(detection);
    }

    /// `Metrics(window) → snapshot` over the trailing `window`.
    pub fn snapshot(&self, window: Duration) -> MetricsSnapshot {
        let inner = self.inner.read();
        let cutoff = Utc::now() - chrono::Duration::from_std(window).unwrap_or_default();

        let requests: Vec<&RequestLog> = inner.requests.iter().filter(|r| r.ts >= cutoff).collect();
        let detections: Vec<&Detection> = inner
            .detections
            .iter()
            .filter(|d| d.timestamp >= cutoff.timestamp_millis())
            .collect();

        let mut counts = RequestCounts::default();
        let mut durations = Vec::with_capacity(requests.len());
        for r in &requests {
            counts.total += 1;
            if r.success {
                counts.successful += 1;
            } else {
                counts.failed += 1;
            }
            if r.blocked {
                counts.blocked += 1;
            }
            if r.captcha {
                counts.captcha += 1;
            }
            durations.push(r.duration_ms);
        }

        let performance = if durations.is_empty() {
            PerformanceStats::default()
        } else {
            let sum: u64 = durations.iter().sum();
            PerformanceStats {
                avg_ms: sum as f64 / durations.len() as f64,
                min_ms: *durations.iter().min().unwrap(),
                max_ms: *durations.iter().max().unwrap(),
                rps: durations.len() as f64 / window.as_secs_f64().max(1.0),
            }
        };

        let mut by_kind: HashMap<String, usize> = HashMap::new();
        for d in &detections {
            *by_kind.entry(format!("{:?}", d.kind)).or_default() += 1;
        }
        let recent: Vec<Detection> = detections.iter().rev().take(10).map(|d| (*d).clone()).collect();

        MetricsSnapshot {
            requests: counts,
            performance,
            detections: DetectionSummary {
                total: detections.len(),
                by_kind,
                recent,
            },
        }
    }

    /// Success rate over `buckets` consecutive windows of `bucket` each,
    /// oldest first.
    pub fn success_rate_trend(&self, buckets: usize, bucket: Duration) -> Vec<TrendBucket> {
        self.rate_trend(buckets, bucket, |r| r.success)
    }

    pub fn detection_rate_trend(&self, buckets: usize, bucket: Duration) -> Vec<TrendBucket> {
        self.rate_trend(buckets, bucket, |r| r.blocked || r.captcha)
    }

    fn rate_trend(&self, buckets: usize, bucket: Duration, predicate: impl Fn(&RequestLog) -> bool) -> Vec<TrendBucket> {
        let inner = self.inner.read();
        let now = Utc::now();
        let bucket_dur = chrono::Duration::from_std(bucket).unwrap_or_default();

        (0..buckets)
            .map(|i| {
                let end = now - bucket_dur * (i as i32);
                let start = end - bucket_dur;
                let in_window: Vec<&RequestLog> = inner
                    .requests
                    .iter()
                    .filter(|r| r.ts >= start && r.ts < end)
                    .collect();
                let rate = if in_window.is_empty() {
                    0.0
                } else {
                    in_window.iter().filter(|r| predicate(r)).count() as f64 / in_window.len() as f64
                };
                TrendBucket { start, rate }
            })
            .rev()
            .collect()
    }

    /// `Health(thresholds) → {healthy, issues[]}` over the trailing 5
    /// minutes.
    pub fn health(&self, thresholds: &HealthThresholds) -> HealthReport {
        let snapshot = self.snapshot(Duration::from_secs(300));
        let mut issues = Vec::new();

        if snapshot.requests.total > 0 {
            let success_rate = snapshot.requests.successful as f64 / snapshot.requests.total as f64;
            if success_rate < thresholds.min_success_rate {
                issues.push(format!(
                    "success rate {:.2} below minimum {:.2}",
                    success_rate, thresholds.min_success_rate
                ));
            }

            let detection_rate = snapshot.detections.total as f64 / snapshot.requests.total as f64;
            if detection_rate > thresholds.max_detection_rate {
                issues.push(format!(
                    "detection rate {:.2} above maximum {:.2}",
                    detection_rate, thresholds.max_detection_rate
                ));
            }
        }

        if snapshot.performance.avg_ms > thresholds.max_avg_ms {
            issues.push(format!(
                "average response time {:.0}ms above maximum {:.0}ms",
                snapshot.performance.avg_ms, thresholds.max_avg_ms
            ));
        }

        HealthReport {
            healthy: issues.is_empty(),
            issues,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.requests.clear();
        inner.detections.clear();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

pub fn detection_kind_label(kind: DetectionKind) -> &'static str {
    match kind {
        DetectionKind::Captcha => "captcha",
        DetectionKind::Challenge => "challenge",
        DetectionKind::Block => "block",
        DetectionKind::RateLimit => "rateLimit",
        DetectionKind::Fingerprint => "fingerprint",
        DetectionKind::Unknown => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(success: bool, blocked: bool, ms: u64) -> RequestLog {
        RequestLog {
            ts: Utc::now(),
            duration_ms: ms,
            success,
            blocked,
            captcha: false,
            url: "http://example.com".into(),
        }
    }

    #[test]
    fn snapshot_aggregates_counts_and_performance() {
        let metrics = Metrics::new();
        metrics.log_request(log(true, false, 100));
        metrics.log_request(log(false, true, 300));

        let snap = metrics.snapshot(Duration::from_secs(300));
        assert_eq!(snap.requests.total, 2);
        assert_eq!(snap.requests.successful, 1);
        assert_eq!(snap.requests.blocked, 1);
        assert_eq!(snap.performance.max_ms, 300);
    }

    #[test]
    fn health_flags_low_success_rate() {
        let metrics = Metrics::new();
        for _ in 0..9 {
            metrics.log_request(log(false, false, 10));
        }
        metrics.log_request(log(true, false, 10));

        let report = metrics.health(&HealthThresholds::default());
        assert!(!report.healthy);
        assert!(report.issues.iter().any(|i| i.contains("success rate")));
    }

    #[test]
    fn reset_clears_history() {
        let metrics = Metrics::new();
        metrics.log_request(log(true, false, 10));
        metrics.reset();
        assert_eq!(metrics.snapshot(Duration::from_secs(300)).requests.total, 0);
    }

    #[test]
    fn max_history_evicts_oldest() {
        let metrics = Metrics::with_capacity(2, 2);
        metrics.log_request(log(true, false, 1));
        metrics.log_request(log(true, false, 2));
        metrics.log_request(log(true, false, 3));
        assert_eq!(metrics.inner.read().requests.len(), 2);
    }
}
