//! Crate-wide error taxonomy.
//!
//! Each subsystem defines its own `thiserror` enum at its own boundary;
//! `OrchestratorError` is the error the worker loop and the CLI ultimately
//! see, with `#[from]` conversions wiring the subsystem errors in. The
//! `kind()` accessor mirrors a fixed recoverability table: the worker loop
//! consults it once per failure and decides retry vs. terminal from the
//! table, it never re-derives recoverability from the variant itself.

use thiserror::Error;

/// High-level error kind, independent of which subsystem raised it.
///
/// Mirrors the error taxonomy table: `rate_limited` and `blocked` trigger
/// backoff/rotation and a retrying `Nack`; `transient_network` and
/// `navigation_failed` retry up to `max_attempts`; `extraction_failed` and
/// `invalid_input` are terminal; `pool_exhausted` waits for capacity and
/// fails the task only on cancellation; `configuration_error` is fatal at
/// startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimited,
    Blocked,
    TransientNetwork,
    NavigationFailed,
    ExtractionFailed,
    InvalidInput,
    PoolExhausted,
    ConfigurationError,
    Cancelled,
}

impl ErrorKind {
    /// Whether a task experiencing this error kind should be retried
    /// (subject to `attempts < max_attempts`).
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::Blocked
                | ErrorKind::TransientNetwork
                | ErrorKind::NavigationFailed
                | ErrorKind::PoolExhausted
        )
    }
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("blocked: {0}")]
    Blocked(String),

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("navigation failed: {0}")]
    NavigationFailed(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("duplicate task id: {0}")]
    Duplicate(String),

    #[error("browser error: {0}")]
    Browser(#[from] crate::browser::BrowserError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::RateLimited(_) => ErrorKind::RateLimited,
            OrchestratorError::Blocked(_) => ErrorKind::Blocked,
            OrchestratorError::TransientNetwork(_) => ErrorKind::TransientNetwork,
            OrchestratorError::NavigationFailed(_) => ErrorKind::NavigationFailed,
            OrchestratorError::ExtractionFailed(_) => ErrorKind::ExtractionFailed,
            OrchestratorError::InvalidInput(_) => ErrorKind::InvalidInput,
            OrchestratorError::PoolExhausted(_) => ErrorKind::PoolExhausted,
            OrchestratorError::ConfigurationError(_) => ErrorKind::ConfigurationError,
            OrchestratorError::Cancelled | OrchestratorError::DeadlineExceeded => {
                ErrorKind::Cancelled
            }
            OrchestratorError::Duplicate(_) => ErrorKind::InvalidInput,
            OrchestratorError::Browser(_) => ErrorKind::NavigationFailed,
            OrchestratorError::Io(_) => ErrorKind::TransientNetwork,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
