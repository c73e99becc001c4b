//! Task queue: priority-ordered, retryable work items with delayed
//! availability and lease/ack/nack semantics, backed by an in-process
//! dashmap store. A Redis/BullMQ-style backend is the reference external
//! implementation; this in-memory one honors the same contract so the
//! rest of the orchestrator is backend-agnostic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::detection::Detection;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub actions: Vec<Action>,
    pub extractors: Vec<Extractor>,
    pub priority: i64,
    pub attempts: u32,
    pub max_attempts: u32,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Action {
    Click { selector: String },
    Type { selector: String, text: String },
    Scroll { y: i64 },
    Wait { ms: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extractor {
    pub name: String,
    pub selector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub data: serde_json::Value,
    pub detections: Vec<Detection>,
    pub failed: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackoffKind {
    Exponential,
    Fixed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub kind: BackoffKind,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempts: u32) -> Duration {
        let ms = match self.kind {
            BackoffKind::Fixed => self.delay_ms,
            BackoffKind::Exponential => self.delay_ms.saturating_mul(2u64.saturating_pow(attempts)),
        };
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Waiting,
    Delayed,
    Leased,
    Completed,
    Failed,
}

struct Entry {
    task: Task,
    status: Status,
    available_at: DateTime<Utc>,
    enqueued_at: DateTime<Utc>,
    lease_expires_at: Option<DateTime<Utc>>,
    terminal_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("duplicate task id: {0}")]
    Duplicate(String),
    #[error("task not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueOptions {
    pub priority: i64,
    #[serde(with = "duration_millis")]
    pub delay: Duration,
    pub id: Option<String>,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            delay: Duration::ZERO,
            id: None,
        }
    }
}

pub struct TaskQueueConfig {
    pub visibility_timeout: Duration,
    pub completed_ttl: Duration,
    pub failed_ttl: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(60),
            completed_ttl: Duration::from_secs(3600),
            failed_ttl: Duration::from_secs(86_400),
            retry_policy: RetryPolicy::default(),
        }
    }
}

type ProgressHook = Arc<dyn Fn(&str, u8) + Send + Sync>;
type CompletedHook = Arc<dyn Fn(&str, &TaskResult) + Send + Sync>;
type FailedHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

#[derive(Default)]
struct Hooks {
    on_completed: Vec<CompletedHook>,
    on_failed: Vec<FailedHook>,
    on_progress: Vec<ProgressHook>,
}

/// Priority-ordered task queue with delayed availability, visibility
/// timeouts, and retry-with-backoff on `Nack`.
pub struct TaskQueue {
    config: TaskQueueConfig,
    entries: DashMap<String, Entry>,
    sequence: AtomicU64,
    seq_of: DashMap<String, u64>,
    paused: std::sync::atomic::AtomicBool,
    hooks: std::sync::Mutex<Hooks>,
    work_available: Notify,
}

impl TaskQueue {
    pub fn new(config: TaskQueueConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            sequence: AtomicU64::new(0),
            seq_of: DashMap::new(),
            paused: std::sync::atomic::AtomicBool::new(false),
            hooks: std::sync::Mutex::new(Hooks::default()),
            work_available: Notify::new(),
        }
    }

    pub fn enqueue(&self, mut task: Task, opts: EnqueueOptions) -> Result<String, QueueError> {
        let id = opts.id.unwrap_or_else(|| task.id.clone());
        if self.entries.contains_key(&id) {
            return Err(QueueError::Duplicate(id));
        }
        task.id = id.clone();
        task.priority = opts.priority;

        let now = Utc::now();
        let available_at = now + chrono::Duration::from_std(opts.delay).unwrap_or_default();
        let status = if opts.delay.is_zero() { Status::Waiting } else { Status::Delayed };

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.seq_of.insert(id.clone(), seq);
        self.entries.insert(
            id.clone(),
            Entry {
                task,
                status,
                available_at,
                enqueued_at: now,
                lease_expires_at: None,
                terminal_at: None,
            },
        );
        self.work_available.notify_one();
        Ok(id)
    }

    pub fn enqueue_bulk(&self, tasks: Vec<(Task, EnqueueOptions)>) -> Result<Vec<String>, QueueError> {
        for (task, opts) in &tasks {
            let id = opts.id.clone().unwrap_or_else(|| task.id.clone());
            if self.entries.contains_key(&id) {
                return Err(QueueError::Duplicate(id));
            }
        }
        tasks.into_iter().map(|(t, o)| self.enqueue(t, o)).collect()
    }

    /// `Lease() → Task`: returns the highest-priority non-delayed,
    /// non-leased task, marking it leased under a visibility timeout.
    /// Strictly by priority descending, FIFO within equal priority.
    pub fn lease(&self) -> Option<Task> {
        if self.paused.load(Ordering::Relaxed) {
            return None;
        }
        let now = Utc::now();

        self.reclaim_expired_leases(now);

        let mut best: Option<(String, i64, u64)> = None;
        for entry in self.entries.iter() {
            let status = entry.status;
            let eligible = match status {
                Status::Waiting => true,
                Status::Delayed => entry.available_at <= now,
                _ => false,
            };
            if !eligible {
                continue;
            }
            let seq = *self.seq_of.get(entry.key()).unwrap();
            let priority = entry.task.priority;
            let better = match &best {
                None => true,
                Some((_, bp, bs)) => priority > *bp || (priority == *bp && seq < *bs),
            };
            if better {
                best = Some((entry.key().clone(), priority, seq));
            }
        }

        let (id, ..) = best?;
        let mut entry = self.entries.get_mut(&id)?;
        entry.status = Status::Leased;
        entry.lease_expires_at = Some(now + chrono::Duration::from_std(self.config.visibility_timeout).unwrap());
        Some(entry.task.clone())
    }

    fn reclaim_expired_leases(&self, now: DateTime<Utc>) {
        for mut entry in self.entries.iter_mut() {
            if entry.status == Status::Leased {
                if let Some(expires) = entry.lease_expires_at {
                    if expires <= now {
                        debug!(task = %entry.task.id, "lease expired, reclaiming");
                        entry.status = Status::Waiting;
                        entry.lease_expires_at = None;
                    }
                }
            }
        }
    }

    /// `Ack(taskId, result)`: completes the task.
    pub fn ack(&self, task_id: &str, result: TaskResult) -> Result<(), QueueError> {
        let mut entry = self.entries.get_mut(task_id).ok_or_else(|| QueueError::NotFound(task_id.to_string()))?;
        entry.status = if result.failed { Status::Failed } else { Status::Completed };
        entry.terminal_at = Some(Utc::now());
        drop(entry);

        let hooks = self.hooks.lock().unwrap();
        if result.failed {
            for h in &hooks.on_failed {
                h(task_id, result.reason.as_deref().unwrap_or("failed"));
            }
        } else {
            for h in &hooks.on_completed {
                h(task_id, &result);
            }
        }
        Ok(())
    }

    /// `Nack(taskId, reason)`: requeues with retry/backoff, or marks
    /// permanently failed once `maxAttempts` is exhausted.
    pub fn nack(&self, task_id: &str, reason: &str) -> Result<(), QueueError> {
        let mut entry = self.entries.get_mut(task_id).ok_or_else(|| QueueError::NotFound(task_id.to_string()))?;
        entry.task.attempts += 1;

        if entry.task.attempts < entry.task.max_attempts {
            let delay = self.config.retry_policy.backoff(entry.task.attempts);
            entry.status = Status::Delayed;
            entry.available_at = Utc::now() + chrono::Duration::from_std(delay).unwrap();
            entry.lease_expires_at = None;
            drop(entry);
            self.work_available.notify_one();
        } else {
            entry.status = Status::Failed;
            entry.terminal_at = Some(Utc::now());
            let hooks = self.hooks.lock().unwrap();
            for h in &hooks.on_failed {
                h(task_id, reason);
            }
        }
        Ok(())
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
        self.work_available.notify_waiters();
    }

    /// `Drain()`: stop accepting leases once current in-flight tasks
    /// settle; callers should pause then wait for `active == 0`.
    pub fn drain(&self) {
        self.pause();
    }

    /// `Obliterate()`: wipes all queue state unconditionally.
    pub fn obliterate(&self) {
        self.entries.clear();
        self.seq_of.clear();
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for entry in self.entries.iter() {
            match entry.status {
                Status::Waiting => stats.waiting += 1,
                Status::Delayed => stats.delayed += 1,
                Status::Leased => stats.active += 1,
                Status::Completed => stats.completed += 1,
                Status::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub fn emit_progress(&self, task_id: &str, percent: u8) {
        let hooks = self.hooks.lock().unwrap();
        for h in &hooks.on_progress {
            h(task_id, percent);
        }
    }

    pub fn on_completed(&self, f: CompletedHook) {
        self.hooks.lock().unwrap().on_completed.push(f);
    }

    pub fn on_failed(&self, f: FailedHook) {
        self.hooks.lock().unwrap().on_failed.push(f);
    }

    pub fn on_progress(&self, f: ProgressHook) {
        self.hooks.lock().unwrap().on_progress.push(f);
    }

    /// Evict completed/failed entries past their retention TTL. Intended
    /// to be called on a periodic tick.
    pub fn sweep_retention(&self) {
        let now = Utc::now();
        let mut expired = Vec::new();
        for entry in self.entries.iter() {
            if let Some(terminal_at) = entry.terminal_at {
                let ttl = match entry.status {
                    Status::Completed => self.config.completed_ttl,
                    Status::Failed => self.config.failed_ttl,
                    _ => continue,
                };
                if now - terminal_at > chrono::Duration::from_std(ttl).unwrap() {
                    expired.push(entry.key().clone());
                }
            }
        }
        if !expired.is_empty() {
            warn!(count = expired.len(), "swept retained tasks past ttl");
        }
        for id in expired {
            self.entries.remove(&id);
            self.seq_of.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_task(id: &str, url: &str, priority: i64) -> Task {
        Task {
            id: id.to_string(),
            url: url.to_string(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            body: None,
            actions: Vec::new(),
            extractors: Vec::new(),
            priority,
            attempts: 0,
            max_attempts: 3,
            deadline: None,
        }
    }

    fn queue() -> TaskQueue {
        TaskQueue::new(TaskQueueConfig::default())
    }

    #[test]
    fn duplicate_id_rejected() {
        let q = queue();
        q.enqueue(new_task("a", "http://x", 1), EnqueueOptions::default()).unwrap();
        let err = q.enqueue(new_task("a", "http://x", 1), EnqueueOptions::default());
        assert!(matches!(err, Err(QueueError::Duplicate(_))));
    }

    #[test]
    fn lease_returns_highest_priority_fifo_on_ties() {
        let q = queue();
        for (id, priority) in [("t1", 1), ("t2", 5), ("t3", 3), ("t4", 5), ("t5", 2)] {
            q.enqueue(new_task(id, "http://x", priority), EnqueueOptions { priority, ..Default::default() }).unwrap();
        }
        let leased: Vec<i64> = (0..4).map(|_| q.lease().unwrap().priority).collect();
        assert_eq!(leased, vec![5, 5, 3, 2]);
    }

    #[test]
    fn nack_retries_until_max_attempts_then_fails() {
        let q = queue();
        let mut task = new_task("a", "http://x", 1);
        task.max_attempts = 2;
        q.enqueue(task, EnqueueOptions::default()).unwrap();

        let leased = q.lease().unwrap();
        assert_eq!(leased.attempts, 0);
        q.nack("a", "transient").unwrap();
        assert_eq!(q.stats().delayed, 1);

        // Force immediate availability for the second lease attempt.
        {
            let mut entry = q.entries.get_mut("a").unwrap();
            entry.available_at = Utc::now() - chrono::Duration::seconds(1);
        }
        let leased = q.lease().unwrap();
        assert_eq!(leased.attempts, 1);
        q.nack("a", "transient").unwrap();
        assert_eq!(q.stats().failed, 1);
    }

    #[test]
    fn enqueue_then_lease_returns_sole_task() {
        let q = queue();
        q.enqueue(new_task("only", "http://x", 1), EnqueueOptions::default()).unwrap();
        let leased = q.lease().unwrap();
        assert_eq!(leased.id, "only");
    }

    #[test]
    fn paused_queue_yields_no_lease() {
        let q = queue();
        q.enqueue(new_task("a", "http://x", 1), EnqueueOptions::default()).unwrap();
        q.pause();
        assert!(q.lease().is_none());
        q.resume();
        assert!(q.lease().is_some());
    }
}
