//! Rate control module
//!
//! Sliding-window + semaphore + exponential-backoff rate limiter.

mod limiter;

pub use limiter::{RateLimiter, RateLimiterConfig, RateLimiterStats, Slot};
