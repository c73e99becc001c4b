//! Worker pool: N long-running workers draining the task queue, each
//! acquiring a rate-limit slot and a session, running the task's action
//! list and extractors, and reporting progress.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::browser::BrowserContext;
use crate::detection;
use crate::metrics::{Metrics, RequestLog};
use crate::proxy::ProxyPool;
use crate::queue::{Action, Task, TaskQueue, TaskResult};
use crate::rate::RateLimiter;
use crate::session::{LeaseOptions, Session, SessionPool};

#[derive(Debug, Clone, Copy)]
enum Disposition {
    Completed,
    Transient,
    Blocked,
}

#[derive(Debug, thiserror::Error)]
enum WorkerError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("blocked")]
    Blocked,
    #[error("extraction failed: {0}")]
    Extraction(String),
}

pub struct WorkerPoolConfig {
    pub worker_count: usize,
    pub proxy_enabled: bool,
    pub grace_period: Duration,
    pub task_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            proxy_enabled: true,
            grace_period: Duration::from_secs(10),
            task_timeout: Duration::from_secs(30),
        }
    }
}

/// N-worker drain loop over a shared `TaskQueue`, `RateLimiter`,
/// `SessionPool`, and `ProxyPool`.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<TaskQueue>,
    rate_limiter: Arc<RateLimiter>,
    sessions: Arc<SessionPool>,
    proxies: Option<Arc<ProxyPool>>,
    metrics: Arc<Metrics>,
    cancel: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
    active_count: Arc<AtomicUsize>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<TaskQueue>,
        rate_limiter: Arc<RateLimiter>,
        sessions: Arc<SessionPool>,
        proxies: Option<Arc<ProxyPool>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            queue,
            rate_limiter,
            sessions,
            proxies,
            metrics,
            cancel: Arc::new(Notify::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
            active_count: Arc::new(AtomicUsize::new(0)),
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// `Start(n)`: launches `config.worker_count` workers.
    pub fn start(self: &Arc<Self>) {
        let mut handles = self.handles.lock().unwrap();
        for worker_id in 0..self.config.worker_count {
            let pool = self.clone();
            handles.push(tokio::spawn(async move { pool.run_worker(worker_id).await }));
        }
    }

    pub fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    /// `Stop()`: drains gracefully within `gracePeriod`, else cancels.
    pub async fn stop(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel.notify_waiters();

        let deadline = Instant::now() + self.config.grace_period;
        while self.active_count.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().unwrap());
        for h in handles {
            h.abort();
        }
    }

    async fn run_worker(self: Arc<Self>, worker_id: usize) {
        info!(worker_id, "worker started");
        while !self.cancelled.load(Ordering::SeqCst) {
            let task = match self.queue.lease() {
                Some(t) => t,
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                        _ = self.cancel.notified() => {}
                    }
                    continue;
                }
            };

            self.active_count.fetch_add(1, Ordering::SeqCst);
            self.execute_task(task).await;
            self.active_count.fetch_sub(1, Ordering::SeqCst);
        }
        info!(worker_id, "worker stopped");
    }

    async fn execute_task(&self, task: Task) {
        let start = Instant::now();
        self.queue.emit_progress(&task.id, 10);

        let slot = match self
            .rate_limiter
            .acquire(Some(Instant::now() + self.config.task_timeout))
            .await
        {
            Ok(slot) => slot,
            Err(e) => {
                warn!(task = %task.id, error = %e, "rate limiter acquire failed");
                let _ = self.queue.nack(&task.id, &e.to_string());
                return;
            }
        };

        let specific_proxy = if self.config.proxy_enabled {
            self.proxies.as_ref().and_then(|p| p.best())
        } else {
            None
        };

        let lease_opts = LeaseOptions {
            use_proxy: self.config.proxy_enabled,
            specific_proxy,
            persist_cookies: false,
            prefer_identity: None,
        };

        let mut session = match self.sessions.lease(lease_opts).await {
            Ok(s) => s,
            Err(e) => {
                warn!(task = %task.id, error = %e, "session lease failed");
                self.rate_limiter.release(slot);
                let _ = self.queue.nack(&task.id, &e.to_string());
                return;
            }
        };

        self.queue.emit_progress(&task.id, 50);

        let outcome = self.run_attempt(&task, &session).await;
        self.queue.emit_progress(&task.id, 90);

        let detections = match &outcome {
            Ok((_, detections)) => detections.clone(),
            Err(_) => Vec::new(),
        };
        self.sessions.record_activity(&session.id, detections.clone()).await;
        for detection in &detections {
            self.metrics.log_detection(detection.clone());
        }

        if let Some(proxy) = &session.proxy {
            if let Some(pool) = &self.proxies {
                let ok = !detection::has_block(&detections);
                pool.update(&proxy.key(), ok);
            }
        }

        let disposition = match &outcome {
            Ok(_) => Disposition::Completed,
            Err(WorkerError::Blocked) => Disposition::Blocked,
            Err(_) => Disposition::Transient,
        };

        match disposition {
            Disposition::Completed => {
                self.sessions.release(&session).await;
                let (data, _) = outcome.unwrap();
                let _ = self.queue.ack(
                    &task.id,
                    TaskResult {
                        data,
                        detections,
                        failed: false,
                        reason: None,
                    },
                );
            }
            Disposition::Transient => {
                self.sessions.release(&session).await;
                let reason = outcome.err().map(|e| e.to_string()).unwrap_or_default();
                if task.attempts + 1 < task.max_attempts {
                    let _ = self.queue.nack(&task.id, &reason);
                } else {
                    let _ = self.queue.ack(
                        &task.id,
                        TaskResult {
                            data: Value::Null,
                            detections,
                            failed: true,
                            reason: Some(reason),
                        },
                    );
                }
            }
            Disposition::Blocked => {
                self.metrics.alerting.alert(
                    crate::metrics::AlertSeverity::Warning,
                    format!("task {} blocked at {}, triggering backoff and session rotation", task.id, task.url),
                );
                self.rate_limiter.trigger_backoff();
                let rotated = self.sessions.rotate(session, LeaseOptions::default()).await;
                session = match rotated {
                    Ok(s) => s,
                    Err(e) => {
                        error!(task = %task.id, error = %e, "failed to rotate session after block");
                        self.rate_limiter.release(slot);
                        let _ = self.queue.nack(&task.id, "blocked");
                        self.log_metrics(&task, start, false, true, false);
                        return;
                    }
                };
                self.sessions.release(&session).await;
                let _ = self.queue.nack(&task.id, "blocked");
            }
        }

        self.rate_limiter.release(slot);
        self.queue.emit_progress(&task.id, 100);

        let success = matches!(disposition, Disposition::Completed);
        let blocked = matches!(disposition, Disposition::Blocked);
        let captcha = detections.iter().any(|d| d.kind == detection::DetectionKind::Captcha);
        self.log_metrics(&task, start, success, blocked, captcha);
    }

    fn log_metrics(&self, task: &Task, start: Instant, success: bool, blocked: bool, captcha: bool) {
        self.metrics.log_request(RequestLog {
            ts: chrono::Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
            success,
            blocked,
            captcha,
            url: task.url.clone(),
        });
    }

    async fn run_attempt(&self, task: &Task, session: &Session) -> Result<(Value, Vec<crate::detection::Detection>), WorkerError> {
        session
            .context
            .navigate(&task.url)
            .await
            .map_err(|e| WorkerError::Transient(e.to_string()))?;

        let detections = detection::classify(session.context.as_ref(), &task.url).await;
        if detection::has_block(&detections) {
            return Err(WorkerError::Blocked);
        }

        for action in &task.actions {
            self.execute_action(session, action).await?;
        }

        let data = self.extract(session, task).await?;
        Ok((data, detections))
    }

    async fn execute_action(&self, session: &Session, action: &Action) -> Result<(), WorkerError> {
        let script = match action {
            Action::Click { selector } => format!("document.querySelector({:?})?.click()", selector),
            Action::Type { selector, text } => format!(
                "(function(){{const e=document.querySelector({:?}); if(e){{e.value={:?};}}}})()",
                selector, text
            ),
            Action::Scroll { y } => format!("window.scrollTo(0,{})", y),
            Action::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                return Ok(());
            }
        };
        session
            .context
            .evaluate(&script)
            .await
            .map(|_| ())
            .map_err(|e| WorkerError::Transient(e.to_string()))
    }

    async fn extract(&self, session: &Session, task: &Task) -> Result<Value, WorkerError> {
        let mut out = serde_json::Map::new();
        for extractor in &task.extractors {
            let script = format!(
                "document.querySelector({:?})?.textContent ?? null",
                extractor.selector
            );
            let value = session
                .context
                .evaluate(&script)
                .await
                .map_err(|e| WorkerError::Extraction(e.to_string()))?;
            out.insert(extractor.name.clone(), value);
        }
        Ok(json!(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    use crate::browser::BrowserError;
    use crate::identity::{IdentityAssembler, IdentityConfig};
    use crate::queue::Extractor;

    struct MockContext {
        html: String,
        calls: StdMutex<Vec<String>>,
    }

    impl MockContext {
        fn new(html: &str) -> Self {
            Self { html: html.to_string(), calls: StdMutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl BrowserContext for MockContext {
        async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
            self.calls.lock().unwrap().push(format!("navigate:{url}"));
            Ok(())
        }

        async fn evaluate(&self, script: &str) -> Result<Value, BrowserError> {
            self.calls.lock().unwrap().push(format!("evaluate:{script}"));
            if script.contains("outerHTML") {
                Ok(Value::String(self.html.clone()))
            } else if script.contains("cookie") {
                Ok(Value::String(String::new()))
            } else if script.contains("textContent") {
                Ok(Value::String("extracted".to_string()))
            } else {
                Ok(Value::Null)
            }
        }

        async fn set_init_script(&self, _script: &str) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn current_url(&self) -> Result<String, BrowserError> {
            Ok("http://example.com".to_string())
        }

        async fn close(&self) -> Result<(), BrowserError> {
            Ok(())
        }
    }

    fn session_with(html: &str) -> Session {
        let identity = IdentityAssembler::assemble(&IdentityConfig::all_randomized());
        Session {
            id: "sess-1".to_string(),
            identity,
            proxy: None,
            context: Arc::new(MockContext::new(html)),
        }
    }

    fn pool() -> WorkerPool {
        WorkerPool::new(
            WorkerPoolConfig::default(),
            Arc::new(TaskQueue::new(crate::queue::TaskQueueConfig::default())),
            Arc::new(RateLimiter::new(crate::rate::RateLimiterConfig::default())),
            Arc::new(SessionPool::new(crate::session::SessionPoolConfig::default())),
            None,
            Arc::new(Metrics::new()),
        )
    }

    fn task(extractors: Vec<Extractor>) -> Task {
        Task {
            id: "task-1".to_string(),
            url: "http://example.com".to_string(),
            method: "GET".to_string(),
            headers: Default::default(),
            body: None,
            actions: vec![],
            extractors,
            priority: 0,
            attempts: 0,
            max_attempts: 3,
            deadline: None,
        }
    }

    #[tokio::test]
    async fn run_attempt_returns_blocked_when_page_is_blocked() {
        let worker = pool();
        let session = session_with("<html>Access Denied - Forbidden</html>");
        let t = task(vec![]);
        let result = worker.run_attempt(&t, &session).await;
        assert!(matches!(result, Err(WorkerError::Blocked)));
    }

    #[tokio::test]
    async fn run_attempt_extracts_data_on_clean_page() {
        let worker = pool();
        let session = session_with("<html>hello world</html>");
        let t = task(vec![Extractor { name: "title".to_string(), selector: "h1".to_string() }]);
        let (data, detections) = worker.run_attempt(&t, &session).await.unwrap();
        assert!(detections.is_empty());
        assert_eq!(data["title"], "extracted");
    }

    #[tokio::test]
    async fn execute_action_wait_sleeps_without_error() {
        let worker = pool();
        let session = session_with("<html></html>");
        let result = worker.execute_action(&session, &Action::Wait { ms: 1 }).await;
        assert!(result.is_ok());
    }
}
