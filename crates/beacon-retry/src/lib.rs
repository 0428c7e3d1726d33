//! # beacon-retry
//!
//! Retrying async operations for Beacon.
//!
//! - [`RetryEngine`]: bounded retries with exponential backoff, jitter,
//!   per-attempt timeouts and cancellation.
//! - [`AsyncOperation`]: one operation with loading/error/data state that
//!   retries automatically and reports every failed attempt to an
//!   [`ErrorTracker`](beacon_report::ErrorTracker).

pub mod engine;
pub mod operation;

pub use engine::{
    AttemptError, AttemptRecord, Delay, DelayFn, ErrorSummary, OnMaxAttemptsExceeded,
    OnRetryAttempt, RetryEngine, RetryError, RetryOptions, RetrySnapshot, RetryStats, ShouldRetry,
};
pub use operation::{AsyncOperation, AsyncOptions, AsyncState, BoxedOperation, ExecuteError, OnError};
