//! Alerting: severity-tagged handler registry plus a bounded log of
//! recent alerts.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

const MAX_RECENT_ALERTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub severity: AlertSeverity,
    pub message: String,
    pub at: DateTime<Utc>,
}

type Handler = Arc<dyn Fn(&AlertRecord) + Send + Sync>;

struct Inner {
    recent: VecDeque<AlertRecord>,
    handlers: Vec<Handler>,
}

/// Broadcasts `Alert(severity, msg)` to every registered handler and
/// retains the last `MAX_RECENT_ALERTS`.
pub struct Alerting {
    inner: RwLock<Inner>,
}

impl Alerting {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                recent: VecDeque::new(),
                handlers: Vec::new(),
            }),
        }
    }

    pub fn register(&self, handler: Handler) {
        self.inner.write().handlers.push(handler);
    }

    pub fn alert(&self, severity: AlertSeverity, message: impl Into<String>) {
        let record = AlertRecord {
            severity,
            message: message.into(),
            at: Utc::now(),
        };

        match severity {
            AlertSeverity::Info => info!(message = %record.message, "alert"),
            AlertSeverity::Warning => warn!(message = %record.message, "alert"),
            AlertSeverity::Critical => error!(message = %record.message, "alert"),
        }

        let mut inner = self.inner.write();
        if inner.recent.len() >= MAX_RECENT_ALERTS {
            inner.recent.pop_front();
        }
        inner.recent.push_back(record.clone());
        let handlers = inner.handlers.clone();
        drop(inner);

        for handler in handlers {
            handler(&record);
        }
    }

    pub fn recent(&self) -> Vec<AlertRecord> {
        self.inner.read().recent.iter().cloned().collect()
    }
}

impl Default for Alerting {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn recent_alerts_capped_at_100() {
        let alerting = Alerting::new();
        for i in 0..150 {
            alerting.alert(AlertSeverity::Info, format!("alert {i}"));
        }
        assert_eq!(alerting.recent().len(), 100);
    }

    #[test]
    fn registered_handlers_are_invoked() {
        let alerting = Alerting::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        alerting.register(Arc::new(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        }));
        alerting.alert(AlertSeverity::Critical, "boom");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
