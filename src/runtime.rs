//! The single `Runtime` handle that owns every pool: rate limiter, proxy
//! pool, session pool, task queue, worker pool, and metrics. Nothing in
//! this crate reaches for global mutable state outside of it.

use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::metrics::Metrics;
use crate::proxy::{parse_proxy_list, Proxy, ProxyPool, ProxyPoolConfig};
use crate::queue::{EnqueueOptions, QueueError, Task, TaskQueue, TaskQueueConfig};
use crate::rate::{RateLimiter, RateLimiterConfig};
use crate::security::{self, SecurityTestOptions, SecurityTestReport, StressTestOptions, StressTestReport};
use crate::session::{SessionPool, SessionPoolConfig};
use crate::worker::{WorkerPool, WorkerPoolConfig};

/// Owns every pool and is the sole root from which crate state is
/// reachable. Constructed once at startup, cloned cheaply via `Arc`
/// handles internally.
pub struct Runtime {
    pub config: AppConfig,
    pub rate_limiter: Arc<RateLimiter>,
    pub proxies: Option<Arc<ProxyPool>>,
    pub sessions: Arc<SessionPool>,
    pub queue: Arc<TaskQueue>,
    pub workers: Arc<WorkerPool>,
    pub metrics: Arc<Metrics>,
}

impl Runtime {
    pub fn new(config: AppConfig) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(RateLimiterConfig::default()));
        let metrics = Arc::new(Metrics::new());

        let proxies = if config.proxy_enabled {
            let pool = ProxyPool::new(ProxyPoolConfig::default());
            if let Some(path) = &config.proxy_list_file {
                match std::fs::read_to_string(path) {
                    Ok(contents) => {
                        let parsed = parse_proxy_list(&contents);
                        info!(count = parsed.len(), path = %path, "loaded proxy list");
                        for proxy in parsed {
                            pool.add(proxy);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, path = %path, "failed to read proxy list file");
                    }
                }
            }
            Some(Arc::new(pool))
        } else {
            None
        };

        let sessions = Arc::new(SessionPool::new(SessionPoolConfig {
            max_sessions: config.max_concurrent_browsers,
            ..SessionPoolConfig::default()
        }));

        let queue = Arc::new(TaskQueue::new(TaskQueueConfig::default()));
        queue.on_completed(Arc::new(|task_id, result| {
            info!(task = %task_id, failed = result.failed, "task completed");
        }));
        queue.on_failed(Arc::new(|task_id, reason| {
            tracing::warn!(task = %task_id, reason, "task failed permanently");
        }));
        queue.on_progress(Arc::new(|task_id, percent| {
            tracing::debug!(task = %task_id, percent, "task progress");
        }));

        let worker_config = WorkerPoolConfig {
            proxy_enabled: config.proxy_enabled,
            task_timeout: std::time::Duration::from_secs(config.default_timeout_secs),
            ..WorkerPoolConfig::default()
        };
        let workers = Arc::new(WorkerPool::new(
            worker_config,
            queue.clone(),
            rate_limiter.clone(),
            sessions.clone(),
            proxies.clone(),
            metrics.clone(),
        ));

        Self {
            config,
            rate_limiter,
            proxies,
            sessions,
            queue,
            workers,
            metrics,
        }
    }

    /// Starts the worker pool draining the task queue in the background,
    /// plus a periodic tick that sweeps idle sessions past `maxIdle` and
    /// retained completed/failed tasks past their TTL.
    pub fn start(self: &Arc<Self>) {
        self.workers.start();
        self.spawn_sweep_tick();
        info!(workers = self.workers_count(), "runtime started");
    }

    fn spawn_sweep_tick(self: &Arc<Self>) {
        let sessions = self.sessions.clone();
        let queue = self.queue.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                sessions.sweep_idle().await;
                queue.sweep_retention();

                let report = metrics.health(&crate::metrics::HealthThresholds::default());
                if !report.healthy {
                    for issue in &report.issues {
                        metrics.alerting.alert(crate::metrics::AlertSeverity::Warning, issue.clone());
                    }
                }
            }
        });
    }

    pub async fn stop(&self) {
        self.workers.stop().await;
        self.sessions.close_all().await;
    }

    fn workers_count(&self) -> usize {
        self.workers.worker_count()
    }

    pub fn enqueue(&self, task: Task, opts: EnqueueOptions) -> Result<String, QueueError> {
        self.queue.enqueue(task, opts)
    }

    pub fn add_proxy(&self, proxy: Proxy) {
        if let Some(pool) = &self.proxies {
            pool.add(proxy);
        }
    }

    pub async fn run_security_test(&self, opts: SecurityTestOptions) -> Result<SecurityTestReport, crate::browser::BrowserError> {
        security::run_security_test(opts, self.proxies.clone()).await
    }

    pub async fn run_stress_test(&self, opts: StressTestOptions) -> Result<StressTestReport, crate::browser::BrowserError> {
        security::run_stress_test(opts, self.proxies.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_runtime_has_no_proxies_when_disabled() {
        let mut config = AppConfig::default();
        config.proxy_enabled = false;
        let runtime = Runtime::new(config);
        assert!(runtime.proxies.is_none());
    }

    #[test]
    fn new_runtime_builds_proxy_pool_when_enabled() {
        let mut config = AppConfig::default();
        config.proxy_enabled = true;
        config.proxy_list_file = None;
        let runtime = Runtime::new(config);
        assert!(runtime.proxies.is_some());
    }
}
