//! Rate limiter: sliding-window counters, a concurrent-slot semaphore, and
//! exponential backoff.
//!
//! `Acquire` blocks until the second/minute/hour windows, the concurrency
//! semaphore, and any active backoff window all admit. Backoff decays only
//! by expiry (`backoff_until`), never by a successful `Acquire` — only an
//! explicit `reset()` clears it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::{OrchestratorError, Result};

/// Rate limiter configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterConfig {
    /// Max requests in any trailing 1s window.
    pub rps: u32,
    /// Max requests in any trailing 60s window.
    pub rpm: u32,
    /// Max requests in any trailing 3600s window.
    pub rph: u32,
    /// Max concurrently held slots.
    pub max_concurrent: usize,
    /// Initial backoff delay.
    pub initial_delay_ms: u64,
    /// Multiplier applied to the delay on each `trigger_backoff`.
    pub backoff_multiplier: f64,
    /// Ceiling for the backoff delay.
    pub max_delay_ms: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            rps: 2,
            rpm: 60,
            rph: 1000,
            max_concurrent: 10,
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 120_000,
        }
    }
}

/// Point-in-time snapshot of the limiter's state, safe to serialize.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterStats {
    pub requests_last_second: usize,
    pub requests_last_minute: usize,
    pub requests_last_hour: usize,
    pub inflight: usize,
    pub backoff_delay_ms: u64,
    pub backoff_remaining_ms: u64,
}

struct Windows {
    second: VecDeque<Instant>,
    minute: VecDeque<Instant>,
    hour: VecDeque<Instant>,
}

impl Windows {
    fn new() -> Self {
        Self {
            second: VecDeque::new(),
            minute: VecDeque::new(),
            hour: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        prune_before(&mut self.second, now - Duration::from_secs(1));
        prune_before(&mut self.minute, now - Duration::from_secs(60));
        prune_before(&mut self.hour, now - Duration::from_secs(3600));
    }

    fn record(&mut self, now: Instant) {
        self.second.push_back(now);
        self.minute.push_back(now);
        self.hour.push_back(now);
    }
}

fn prune_before(deque: &mut VecDeque<Instant>, cutoff: Instant) {
    while let Some(front) = deque.front() {
        if *front < cutoff {
            deque.pop_front();
        } else {
            break;
        }
    }
}

/// Earliest instant at which `count < limit` will hold again, given the
/// current window contents (already pruned).
fn next_admit_at(deque: &VecDeque<Instant>, limit: u32, window: Duration, now: Instant) -> Option<Instant> {
    if limit == 0 {
        return None; // no limit configured
    }
    if (deque.len() as u32) < limit {
        return Some(now);
    }
    // the window becomes admissible once its oldest entry ages out
    deque.front().map(|oldest| *oldest + window)
}

struct BackoffState {
    delay: Duration,
    until: Option<Instant>,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            until: None,
        }
    }
}

struct Inner {
    windows: Windows,
    backoff: BackoffState,
}

/// A held admission slot. Dropping it (or calling `release` explicitly)
/// frees the concurrency permit.
pub struct Slot {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

pub struct RateLimiter {
    config: Mutex<RateLimiterConfig>,
    inner: Mutex<Inner>,
    semaphore: std::sync::Arc<Semaphore>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let semaphore = std::sync::Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config: Mutex::new(config),
            inner: Mutex::new(Inner {
                windows: Windows::new(),
                backoff: BackoffState::new(),
            }),
            semaphore,
        }
    }

    pub fn set_config(&self, config: RateLimiterConfig) {
        *self.config.lock() = config;
    }

    pub fn config(&self) -> RateLimiterConfig {
        self.config.lock().clone()
    }

    /// Blocks until every admission condition holds, then records a
    /// request timestamp and returns a held `Slot`. Only fails with
    /// `Cancelled`/`DeadlineExceeded`; never fails for rate reasons.
    pub async fn acquire(&self, deadline: Option<Instant>) -> Result<Slot> {
        loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(OrchestratorError::DeadlineExceeded);
                }
            }

            let wait = {
                let config = self.config.lock().clone();
                let mut inner = self.inner.lock();
                let now = Instant::now();
                inner.windows.prune(now);

                // backoff is the most unconditional wait: check it first.
                if let Some(until) = inner.backoff.until {
                    if now < until {
                        Some(until - now)
                    } else {
                        None
                    }
                } else {
                    None
                }
                .or_else(|| {
                    // the most restrictive window wins the tie-break.
                    let candidates = [
                        next_admit_at(&inner.windows.second, config.rps, Duration::from_secs(1), now),
                        next_admit_at(&inner.windows.minute, config.rpm, Duration::from_secs(60), now),
                        next_admit_at(&inner.windows.hour, config.rph, Duration::from_secs(3600), now),
                    ];
                    candidates
                        .into_iter()
                        .flatten()
                        .filter(|at| *at > now)
                        .max()
                        .map(|at| at - now)
                })
            };

            if let Some(wait) = wait {
                debug!("rate limiter waiting {:?}", wait);
                tokio::time::sleep(wait).await;
                continue;
            }

            // windows are open; now take the concurrency slot.
            let permit = match deadline {
                Some(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    match tokio::time::timeout(
                        timeout,
                        self.semaphore.clone().acquire_owned(),
                    )
                    .await
                    {
                        Ok(Ok(permit)) => permit,
                        Ok(Err(_)) => return Err(OrchestratorError::Cancelled),
                        Err(_) => return Err(OrchestratorError::DeadlineExceeded),
                    }
                }
                None => self
                    .semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| OrchestratorError::Cancelled)?,
            };

            // Re-check windows under lock: another waiter might have
            // raced us between the window check and the semaphore wait.
            let now = Instant::now();
            let mut inner = self.inner.lock();
            inner.windows.prune(now);
            let config = self.config.lock().clone();
            let still_open = [
                next_admit_at(&inner.windows.second, config.rps, Duration::from_secs(1), now),
                next_admit_at(&inner.windows.minute, config.rpm, Duration::from_secs(60), now),
                next_admit_at(&inner.windows.hour, config.rph, Duration::from_secs(3600), now),
            ]
            .into_iter()
            .flatten()
            .all(|at| at <= now);

            let backoff_open = inner
                .backoff
                .until
                .map(|until| now >= until)
                .unwrap_or(true);

            if still_open && backoff_open {
                inner.windows.record(now);
                return Ok(Slot { _permit: permit });
            }
            // lost the race; drop the permit and loop back to wait again.
        }
    }

    /// Releases a previously-acquired slot. `Slot`'s `Drop` already frees
    /// the semaphore permit; this exists for symmetry with the
    /// `Release(slot)` contract and is a no-op beyond dropping.
    pub fn release(&self, slot: Slot) {
        drop(slot);
    }

    /// `delay <- min(max(delay*multiplier, initial), max)`,
    /// `backoff_until <- now + delay`.
    pub fn trigger_backoff(&self) {
        let config = self.config.lock().clone();
        let mut inner = self.inner.lock();
        let initial = Duration::from_millis(config.initial_delay_ms);
        let max = Duration::from_millis(config.max_delay_ms);

        let candidate = if inner.backoff.delay.is_zero() {
            initial
        } else {
            inner.backoff.delay.mul_f64(config.backoff_multiplier)
        };
        inner.backoff.delay = candidate.max(initial).min(max);
        inner.backoff.until = Some(Instant::now() + inner.backoff.delay);
    }

    /// Zeros counters and backoff.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.windows = Windows::new();
        inner.backoff = BackoffState::new();
    }

    pub fn stats(&self) -> RateLimiterStats {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.windows.prune(now);
        let backoff_remaining = inner
            .backoff
            .until
            .map(|until| until.saturating_duration_since(now).as_millis() as u64)
            .unwrap_or(0);

        RateLimiterStats {
            requests_last_second: inner.windows.second.len(),
            requests_last_minute: inner.windows.minute.len(),
            requests_last_hour: inner.windows.hour.len(),
            inflight: self.config.lock().max_concurrent.max(1) - self.semaphore.available_permits(),
            backoff_delay_ms: inner.backoff.delay.as_millis() as u64,
            backoff_remaining_ms: backoff_remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_window_enforced() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            rps: 1,
            rpm: 100,
            rph: 1000,
            max_concurrent: 10,
            ..RateLimiterConfig::default()
        });

        let start = Instant::now();
        let s1 = limiter.acquire(None).await.unwrap();
        limiter.release(s1);
        let s2 = limiter.acquire(None).await.unwrap();
        limiter.release(s2);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(900), "elapsed={:?}", elapsed);
    }

    #[tokio::test]
    async fn concurrency_cap_blocks_extra_acquirer() {
        let limiter = std::sync::Arc::new(RateLimiter::new(RateLimiterConfig {
            rps: 1000,
            rpm: 1000,
            rph: 1000,
            max_concurrent: 1,
            ..RateLimiterConfig::default()
        }));

        let s1 = limiter.acquire(None).await.unwrap();

        let limiter2 = limiter.clone();
        let handle = tokio::spawn(async move { limiter2.acquire(None).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        limiter.release(s1);
        let s2 = handle.await.unwrap().unwrap();
        limiter.release(s2);
    }

    #[test]
    fn backoff_escalates_and_caps() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 1000,
            ..RateLimiterConfig::default()
        });

        let mut last = Duration::ZERO;
        for _ in 0..10 {
            limiter.trigger_backoff();
            let delay = limiter.inner.lock().backoff.delay;
            assert!(delay >= last);
            assert!(delay.as_millis() as u64 <= 1000);
            last = delay;
        }
        assert_eq!(last.as_millis() as u64, 1000);
    }

    #[test]
    fn reset_zeros_state() {
        let limiter = RateLimiter::new(RateLimiterConfig::default());
        limiter.trigger_backoff();
        limiter.reset();
        let stats = limiter.stats();
        assert_eq!(stats.backoff_delay_ms, 0);
        assert_eq!(stats.requests_last_second, 0);
    }
}
