//! Session pool: a bounded set of live browser contexts, each bound to
//! one identity and optionally one proxy, with LRU eviction on overflow.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};
use uuid::Uuid;

use crate::browser::{BrowserContext, BrowserError, ChromiumContext, LaunchOptions};
use crate::detection::Detection;
use crate::identity::{Identity, IdentityAssembler, IdentityConfig};
use crate::proxy::{to_driver_form, Proxy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Opening,
    Idle,
    InUse,
    Closing,
    Closed,
}

/// Options controlling how `SessionPool::lease` picks or opens a context.
#[derive(Debug, Clone, Default)]
pub struct LeaseOptions {
    pub use_proxy: bool,
    pub specific_proxy: Option<Proxy>,
    pub persist_cookies: bool,
    pub prefer_identity: Option<IdentityConfig>,
}

pub struct SessionRecord {
    pub id: String,
    pub identity: Identity,
    pub proxy: Option<Proxy>,
    pub started_at: Instant,
    pub request_count: u64,
    pub detections: Vec<Detection>,
    pub context: Arc<dyn BrowserContext>,
    pub state: SessionState,
    pub last_used: Instant,
}

/// An owned handle to a leased session. Dropping it without calling
/// `release`/`close` on the pool leaks the slot; callers should always
/// release via `SessionPool::release`.
pub struct Session {
    pub id: String,
    pub identity: Identity,
    pub proxy: Option<Proxy>,
    pub context: Arc<dyn BrowserContext>,
}

#[derive(Debug, Clone)]
pub struct SessionPoolConfig {
    pub max_sessions: usize,
    pub max_idle: Duration,
    pub headless: bool,
    pub chrome_path: Option<String>,
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 5,
            max_idle: Duration::from_secs(300),
            headless: true,
            chrome_path: None,
        }
    }
}

struct Inner {
    sessions: HashMap<String, SessionRecord>,
    /// Slots reserved for an in-flight `open_new` launch that hasn't
    /// inserted its record yet. Counted against `max_sessions` alongside
    /// `sessions.len()` so two concurrent leases can't both observe spare
    /// capacity and both launch.
    pending_opens: usize,
}

/// Bounded, LRU-evictable pool of live browser contexts.
pub struct SessionPool {
    config: SessionPoolConfig,
    inner: Mutex<Inner>,
    capacity_freed: Notify,
}

impl SessionPool {
    pub fn new(config: SessionPoolConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                pending_opens: 0,
            }),
            capacity_freed: Notify::new(),
        }
    }

    /// `Lease(opts) → Session`. Reuses an idle session when the caller
    /// has no specific identity/proxy requirement; otherwise opens a new
    /// context if there's capacity, evicting the oldest idle session to
    /// make room, or blocks until one is released.
    pub async fn lease(&self, opts: LeaseOptions) -> Result<Session, BrowserError> {
        let fungible = opts.specific_proxy.is_none() && opts.prefer_identity.is_none();

        loop {
            {
                let mut inner = self.inner.lock().await;

                if fungible {
                    if let Some(id) = oldest_idle(&inner.sessions) {
                        let record = inner.sessions.get_mut(&id).unwrap();
                        record.state = SessionState::InUse;
                        record.last_used = Instant::now();
                        return Ok(Session {
                            id: record.id.clone(),
                            identity: record.identity.clone(),
                            proxy: record.proxy.clone(),
                            context: record.context.clone(),
                        });
                    }
                }

                if inner.sessions.len() + inner.pending_opens < self.config.max_sessions {
                    inner.pending_opens += 1;
                    drop(inner);
                    return self.open_new_tracked(opts).await;
                }

                if let Some(id) = oldest_idle(&inner.sessions) {
                    info!(session = %id, "evicting idle session to make room");
                    if let Some(record) = inner.sessions.remove(&id) {
                        tokio::spawn(async move {
                            let _ = record.context.close().await;
                        });
                    }
                    inner.pending_opens += 1;
                    drop(inner);
                    return self.open_new_tracked(opts).await;
                }
            }

            self.capacity_freed.notified().await;
        }
    }

    /// Wraps `open_new` with the `pending_opens` reservation taken by the
    /// caller under `inner`'s lock: releases the reservation once the
    /// launch settles, whether it succeeds or fails.
    async fn open_new_tracked(&self, opts: LeaseOptions) -> Result<Session, BrowserError> {
        let result = self.open_new(opts).await;
        {
            let mut inner = self.inner.lock().await;
            inner.pending_opens = inner.pending_opens.saturating_sub(1);
        }
        if result.is_err() {
            // the reserved slot went unused; wake any blocked waiter.
            self.capacity_freed.notify_one();
        }
        result
    }

    async fn open_new(&self, opts: LeaseOptions) -> Result<Session, BrowserError> {
        let identity_cfg = opts.prefer_identity.unwrap_or_default();
        let identity = IdentityAssembler::assemble(&identity_cfg);

        let proxy = opts.specific_proxy;
        let driver_form = proxy.as_ref().map(to_driver_form);

        let launch_opts = LaunchOptions {
            headless: self.config.headless,
            chrome_path: self.config.chrome_path.clone(),
            user_data_dir: None,
            proxy: driver_form,
            timeout_secs: 60,
        };

        let context: Arc<dyn BrowserContext> = Arc::new(ChromiumContext::launch(&identity, launch_opts).await?);
        let id = Uuid::new_v4().to_string();

        let record = SessionRecord {
            id: id.clone(),
            identity: identity.clone(),
            proxy: proxy.clone(),
            started_at: Instant::now(),
            request_count: 0,
            detections: Vec::new(),
            context: context.clone(),
            state: SessionState::InUse,
            last_used: Instant::now(),
        };

        self.inner.lock().await.sessions.insert(id.clone(), record);

        Ok(Session {
            id,
            identity,
            proxy,
            context,
        })
    }

    /// `Release(sess)`: returns the session to idle.
    pub async fn release(&self, sess: &Session) {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.sessions.get_mut(&sess.id) {
            record.state = SessionState::Idle;
            record.last_used = Instant::now();
        }
        drop(inner);
        self.capacity_freed.notify_one();
    }

    /// Record a completed request and any detections against a session.
    pub async fn record_activity(&self, session_id: &str, detections: Vec<Detection>) {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.sessions.get_mut(session_id) {
            record.request_count += 1;
            record.detections.extend(detections);
        }
    }

    /// `Rotate(sess)`: closes the session and returns a fresh one.
    pub async fn rotate(&self, sess: Session, opts: LeaseOptions) -> Result<Session, BrowserError> {
        self.close(&sess.id).await;
        self.open_new(opts).await
    }

    /// `Close(sess)`: definitive closure.
    pub async fn close(&self, session_id: &str) {
        let record = {
            let mut inner = self.inner.lock().await;
            inner.sessions.remove(session_id)
        };
        if let Some(record) = record {
            if let Err(e) = record.context.close().await {
                warn!(session = %session_id, error = %e, "error closing session");
            }
        }
        self.capacity_freed.notify_one();
    }

    /// `CloseAll()`.
    pub async fn close_all(&self) {
        let records: Vec<SessionRecord> = {
            let mut inner = self.inner.lock().await;
            inner.sessions.drain().map(|(_, r)| r).collect()
        };
        for record in records {
            let _ = record.context.close().await;
        }
    }

    /// Lazily close idle sessions older than `max_idle`. Intended to be
    /// called on a periodic tick.
    pub async fn sweep_idle(&self) {
        let expired: Vec<String> = {
            let inner = self.inner.lock().await;
            inner
                .sessions
                .values()
                .filter(|r| r.state == SessionState::Idle && r.last_used.elapsed() > self.config.max_idle)
                .map(|r| r.id.clone())
                .collect()
        };
        for id in expired {
            self.close(&id).await;
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}

fn oldest_idle(sessions: &HashMap<String, SessionRecord>) -> Option<String> {
    sessions
        .values()
        .filter(|r| r.state == SessionState::Idle)
        .min_by_key(|r| r.last_used)
        .map(|r| r.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_options_default_has_no_proxy() {
        let opts = LeaseOptions::default();
        assert!(!opts.use_proxy);
        assert!(opts.specific_proxy.is_none());
    }

    #[test]
    fn session_pool_config_defaults_are_sane() {
        let cfg = SessionPoolConfig::default();
        assert!(cfg.max_sessions > 0);
        assert!(cfg.max_idle > Duration::from_secs(0));
    }
}
