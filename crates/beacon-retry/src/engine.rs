//! Retry engine with exponential backoff.
//!
//! A [`RetryEngine`] runs an async operation until it succeeds, the attempt
//! budget is spent, the retry predicate declines, or the sequence is aborted.
//! Between attempts it waits `base * 2^(attempt-1)` (capped at `max_delay`),
//! optionally with up to 10% jitter.
//!
//! The engine keeps observable state: attempt count, per-attempt history, the
//! last failure and aggregate stats. [`RetryEngine::snapshot`] returns all of
//! it in one value.
//!
//! ## Example
//!
//! ```
//! use beacon_retry::{RetryEngine, RetryOptions};
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let engine: RetryEngine<String> = RetryEngine::new(
//!     RetryOptions::default()
//!         .with_max_attempts(4)
//!         .with_delay(Duration::from_millis(200)),
//! );
//!
//! let value = engine
//!     .retry(|| async { Ok::<_, String>(42) })
//!     .await
//!     .unwrap();
//! assert_eq!(value, 42);
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use beacon_core::classify::{classify, Classify, ErrorKind, Thrown};
use beacon_core::RetryConfig;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Computes the base delay for a given 1-based attempt number.
pub type DelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Decides whether a failed attempt should be retried.
pub type ShouldRetry<E> = Arc<dyn Fn(&AttemptError<E>, u32) -> bool + Send + Sync>;

/// Called before each backoff wait with the failure, attempt number and delay.
pub type OnRetryAttempt<E> = Arc<dyn Fn(&AttemptError<E>, u32, Duration) + Send + Sync>;

/// Called once when the attempt budget is exhausted.
pub type OnMaxAttemptsExceeded<E> = Arc<dyn Fn(&AttemptError<E>, &[AttemptRecord]) + Send + Sync>;

/// Source of the base delay between attempts.
#[derive(Clone)]
pub enum Delay {
    Fixed(Duration),
    Custom(DelayFn),
}

impl Delay {
    fn base_for(&self, attempt: u32) -> Duration {
        match self {
            Delay::Fixed(d) => *d,
            Delay::Custom(f) => f(attempt),
        }
    }
}

impl fmt::Debug for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delay::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            Delay::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Retry engine configuration.
pub struct RetryOptions<E> {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    pub delay: Delay,
    /// Upper bound for any single wait
    pub max_delay: Duration,
    pub exponential_backoff: bool,
    /// Add up to 10% random extra delay
    pub jitter: bool,
    /// Per-attempt deadline
    pub timeout: Option<Duration>,
    pub should_retry: Option<ShouldRetry<E>>,
    pub on_retry_attempt: Option<OnRetryAttempt<E>>,
    pub on_max_attempts_exceeded: Option<OnMaxAttemptsExceeded<E>>,
}

impl<E> Default for RetryOptions<E> {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Delay::Fixed(Duration::from_millis(1000)),
            max_delay: Duration::from_millis(30_000),
            exponential_backoff: true,
            jitter: false,
            timeout: None,
            should_retry: None,
            on_retry_attempt: None,
            on_max_attempts_exceeded: None,
        }
    }
}

impl<E> Clone for RetryOptions<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            delay: self.delay.clone(),
            max_delay: self.max_delay,
            exponential_backoff: self.exponential_backoff,
            jitter: self.jitter,
            timeout: self.timeout,
            should_retry: self.should_retry.clone(),
            on_retry_attempt: self.on_retry_attempt.clone(),
            on_max_attempts_exceeded: self.on_max_attempts_exceeded.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryOptions<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .field("max_delay", &self.max_delay)
            .field("exponential_backoff", &self.exponential_backoff)
            .field("jitter", &self.jitter)
            .field("timeout", &self.timeout)
            .field("should_retry", &self.should_retry.is_some())
            .finish_non_exhaustive()
    }
}

impl<E> RetryOptions<E> {
    /// Options taken from the `retry` config section.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: Delay::Fixed(Duration::from_millis(config.base_delay_ms)),
            max_delay: Duration::from_millis(config.max_delay_ms),
            exponential_backoff: config.exponential_backoff,
            jitter: config.jitter,
            timeout: config.timeout_ms.map(Duration::from_millis),
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Delay::Fixed(delay);
        self
    }

    /// Compute the base delay per attempt. Backoff still applies on top.
    pub fn with_delay_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.delay = Delay::Custom(Arc::new(f));
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_exponential_backoff(mut self, enabled: bool) -> Self {
        self.exponential_backoff = enabled;
        self
    }

    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_should_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(&AttemptError<E>, u32) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(f));
        self
    }

    pub fn on_retry_attempt<F>(mut self, f: F) -> Self
    where
        F: Fn(&AttemptError<E>, u32, Duration) + Send + Sync + 'static,
    {
        self.on_retry_attempt = Some(Arc::new(f));
        self
    }

    pub fn on_max_attempts_exceeded<F>(mut self, f: F) -> Self
    where
        F: Fn(&AttemptError<E>, &[AttemptRecord]) + Send + Sync + 'static,
    {
        self.on_max_attempts_exceeded = Some(Arc::new(f));
        self
    }
}

/// Failure of a single attempt.
#[derive(Debug, Error)]
pub enum AttemptError<E> {
    /// The operation itself failed
    #[error("{0}")]
    Failed(E),
    /// The attempt did not settle before the per-attempt deadline
    #[error("attempt timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
}

impl<E> AttemptError<E> {
    /// The operation's own error, if this was not a timeout.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            AttemptError::Failed(e) => Some(e),
            AttemptError::TimedOut(_) => None,
        }
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            AttemptError::Failed(e) => Some(e),
            AttemptError::TimedOut(_) => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, AttemptError::TimedOut(_))
    }
}

impl<E: Classify> Classify for AttemptError<E> {
    fn thrown(&self) -> Thrown<'_> {
        match self {
            AttemptError::Failed(e) => e.thrown(),
            AttemptError::TimedOut(_) => Thrown::Tagged {
                kind: ErrorKind::Timeout,
                message: "Operation timed out",
            },
        }
    }
}

/// Terminal failure of a retry sequence.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Another sequence is already running on this engine
    #[error("a retry sequence is already in progress")]
    InProgress,

    /// The sequence was cancelled with [`RetryEngine::abort`] or reset
    #[error("retry aborted after {attempt_count} attempt(s)")]
    Aborted {
        attempt_count: u32,
        retry_history: Vec<AttemptRecord>,
    },

    /// The last attempt failed and no further attempt will be made
    #[error("{error}")]
    Exhausted {
        error: AttemptError<E>,
        attempt_count: u32,
        retry_history: Vec<AttemptRecord>,
        /// True when the budget ran out, false when the predicate declined
        max_attempts_reached: bool,
    },
}

impl<E> RetryError<E> {
    pub fn attempt_count(&self) -> u32 {
        match self {
            RetryError::InProgress => 0,
            RetryError::Aborted { attempt_count, .. }
            | RetryError::Exhausted { attempt_count, .. } => *attempt_count,
        }
    }

    pub fn retry_history(&self) -> &[AttemptRecord] {
        match self {
            RetryError::InProgress => &[],
            RetryError::Aborted { retry_history, .. }
            | RetryError::Exhausted { retry_history, .. } => retry_history,
        }
    }

    pub fn max_attempts_reached(&self) -> bool {
        matches!(
            self,
            RetryError::Exhausted {
                max_attempts_reached: true,
                ..
            }
        )
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, RetryError::Aborted { .. })
    }

    /// The operation's last error, when the sequence ended on one.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { error, .. } => error.as_inner(),
            _ => None,
        }
    }
}

impl<E: Classify> Classify for RetryError<E> {
    fn thrown(&self) -> Thrown<'_> {
        match self {
            RetryError::Exhausted { error, .. } => error.thrown(),
            RetryError::Aborted { .. } => Thrown::Tagged {
                kind: ErrorKind::Aborted,
                message: "Retry aborted",
            },
            RetryError::InProgress => Thrown::Tagged {
                kind: ErrorKind::General,
                message: "A retry is already in progress",
            },
        }
    }
}

/// One failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    /// 1-based
    pub attempt_number: u32,
    pub error_kind: ErrorKind,
    pub message: String,
    /// How long the attempt ran before failing
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

/// Classified summary of the most recent failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSummary {
    pub kind: ErrorKind,
    pub message: String,
    pub user_message: String,
}

impl ErrorSummary {
    pub fn of<E: Classify + ?Sized>(error: &E) -> Self {
        let classification = classify(error);
        Self {
            kind: classification.kind,
            message: error
                .message()
                .unwrap_or_else(|| classification.user_message.clone()),
            user_message: classification.user_message,
        }
    }
}

/// Aggregate numbers for the current sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStats {
    pub total_attempts: u32,
    pub failed_attempts: usize,
    /// Effective base delay once at least one retry happened, zero before
    pub average_retry_delay: Duration,
    pub remaining_attempts: u32,
}

/// Point-in-time view of an engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySnapshot {
    pub is_retrying: bool,
    pub attempt_count: u32,
    pub last_error: Option<ErrorSummary>,
    pub retry_history: Vec<AttemptRecord>,
    pub can_retry: bool,
    pub retry_stats: RetryStats,
    pub max_attempts_reached: bool,
    /// Delay that would precede the next attempt, without jitter
    pub next_retry_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct RetryState {
    /// Bumped on every sequence start and reset; stale sequences stop writing
    generation: u64,
    is_retrying: bool,
    attempt_count: u32,
    last_error: Option<ErrorSummary>,
    history: Vec<AttemptRecord>,
    cancel: Option<CancellationToken>,
}

/// Runs async operations with retries and backoff.
pub struct RetryEngine<E> {
    options: RetryOptions<E>,
    state: Mutex<RetryState>,
}

impl<E> fmt::Debug for RetryEngine<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryEngine")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<E> Default for RetryEngine<E> {
    fn default() -> Self {
        Self::new(RetryOptions::default())
    }
}

impl<E> RetryEngine<E> {
    pub fn new(mut options: RetryOptions<E>) -> Self {
        options.max_attempts = options.max_attempts.max(1);
        Self {
            options,
            state: Mutex::new(RetryState::default()),
        }
    }

    pub fn options(&self) -> &RetryOptions<E> {
        &self.options
    }

    /// Wait before the attempt following `attempt` (1-based), jitter included.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for_attempt(attempt);
        if !self.options.jitter {
            return delay;
        }

        let spread = delay.as_millis() as u64 / 10;
        let extra = rand::rng().random_range(0..=spread);
        whole_millis((delay + Duration::from_millis(extra)).min(self.options.max_delay))
    }

    fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.options.delay.base_for(attempt);
        let delay = if self.options.exponential_backoff {
            let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
            base.saturating_mul(factor)
        } else {
            base
        };
        whole_millis(delay.min(self.options.max_delay))
    }

    pub fn is_retrying(&self) -> bool {
        self.lock().is_retrying
    }

    /// Attempts started in the current (or last) sequence.
    pub fn attempt_count(&self) -> u32 {
        self.lock().attempt_count
    }

    pub fn snapshot(&self) -> RetrySnapshot {
        let state = self.lock();
        let max = self.options.max_attempts;
        let retried = state.attempt_count > 1;

        RetrySnapshot {
            is_retrying: state.is_retrying,
            attempt_count: state.attempt_count,
            last_error: state.last_error.clone(),
            retry_history: state.history.clone(),
            can_retry: !state.is_retrying && state.attempt_count < max,
            retry_stats: RetryStats {
                total_attempts: state.attempt_count,
                failed_attempts: state.history.len(),
                average_retry_delay: if retried {
                    whole_millis(self.options.delay.base_for(1))
                } else {
                    Duration::ZERO
                },
                remaining_attempts: max.saturating_sub(state.attempt_count),
            },
            max_attempts_reached: state.attempt_count >= max,
            next_retry_delay: (state.attempt_count < max)
                .then(|| self.base_delay_for_attempt(state.attempt_count.max(1))),
        }
    }

    /// Cancel the running sequence. A pending wait ends immediately and no
    /// further attempt starts; the sequence resolves with
    /// [`RetryError::Aborted`].
    pub fn abort(&self) {
        if let Some(token) = &self.lock().cancel {
            debug!("aborting retry sequence");
            token.cancel();
        }
    }

    /// Abort anything running and return to the initial state.
    pub fn reset(&self) {
        let mut state = self.lock();
        if let Some(token) = state.cancel.take() {
            token.cancel();
        }
        let generation = state.generation + 1;
        *state = RetryState {
            generation,
            ..RetryState::default()
        };
    }

    fn lock(&self) -> MutexGuard<'_, RetryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` only if the sequence identified by `generation` still owns
    /// the state.
    fn update<R>(&self, generation: u64, f: impl FnOnce(&mut RetryState) -> R) -> Option<R> {
        let mut state = self.lock();
        (state.generation == generation).then(|| f(&mut *state))
    }

    fn aborted(&self, generation: u64, attempt_count: u32, history: Vec<AttemptRecord>) -> RetryError<E> {
        self.update(generation, |state| {
            state.is_retrying = false;
            state.cancel = None;
            state.last_error = Some(ErrorSummary {
                kind: ErrorKind::Aborted,
                message: "Retry aborted".to_string(),
                user_message: "Retry aborted".to_string(),
            });
        });
        info!(attempts = attempt_count, "Retry sequence aborted");
        RetryError::Aborted {
            attempt_count,
            retry_history: history,
        }
    }
}

impl<E: Classify> RetryEngine<E> {
    /// Run `operation` until it succeeds or the sequence ends.
    ///
    /// Arguments are captured by the closure, so every attempt sees the same
    /// inputs. Only one sequence may run per engine at a time; a concurrent
    /// call fails with [`RetryError::InProgress`] without touching state.
    pub async fn retry<T, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let (generation, token) = {
            let mut state = self.lock();
            if state.is_retrying {
                return Err(RetryError::InProgress);
            }
            let token = CancellationToken::new();
            let generation = state.generation + 1;
            *state = RetryState {
                generation,
                is_retrying: true,
                cancel: Some(token.clone()),
                ..RetryState::default()
            };
            (generation, token)
        };
        let _guard = SequenceGuard {
            engine: self,
            generation,
        };

        let max_attempts = self.options.max_attempts;
        let mut history: Vec<AttemptRecord> = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            if token.is_cancelled() {
                return Err(self.aborted(generation, attempt, history));
            }

            attempt += 1;
            self.update(generation, |state| state.attempt_count = attempt);

            let started = Instant::now();
            let timestamp = Utc::now();
            let attempt_future = async {
                match self.options.timeout {
                    Some(limit) => match tokio::time::timeout(limit, operation()).await {
                        Ok(result) => result.map_err(AttemptError::Failed),
                        Err(_) => Err(AttemptError::TimedOut(limit)),
                    },
                    None => operation().await.map_err(AttemptError::Failed),
                }
            };

            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(self.aborted(generation, attempt, history));
                }
                outcome = attempt_future => outcome,
            };

            let error = match outcome {
                Ok(value) => {
                    self.update(generation, |state| {
                        state.is_retrying = false;
                        state.last_error = None;
                        state.cancel = None;
                    });
                    if attempt > 1 {
                        info!(attempts = attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let summary = ErrorSummary::of(&error);
            history.push(AttemptRecord {
                attempt_number: attempt,
                error_kind: summary.kind,
                message: summary.message.clone(),
                duration: started.elapsed(),
                timestamp,
            });
            self.update(generation, |state| {
                state.history = history.clone();
                state.last_error = Some(summary);
            });

            let exhausted = attempt >= max_attempts;
            let wants_retry = !exhausted
                && match &self.options.should_retry {
                    Some(predicate) => predicate(&error, attempt),
                    None => true,
                };

            if !wants_retry {
                if exhausted {
                    warn!(
                        attempts = attempt,
                        max_attempts,
                        error = %summary_message(&history),
                        "Operation failed after all retries"
                    );
                    if let Some(callback) = &self.options.on_max_attempts_exceeded {
                        callback(&error, history.as_slice());
                    }
                } else {
                    debug!(attempt, "Retry predicate declined, giving up");
                }
                self.update(generation, |state| {
                    state.is_retrying = false;
                    state.cancel = None;
                });
                return Err(RetryError::Exhausted {
                    error,
                    attempt_count: attempt,
                    retry_history: history,
                    max_attempts_reached: exhausted,
                });
            }

            let delay = self.delay_for_attempt(attempt);
            if let Some(callback) = &self.options.on_retry_attempt {
                callback(&error, attempt, delay);
            }
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Operation failed, retrying with backoff"
            );

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(self.aborted(generation, attempt, history));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Clears the in-flight flag if the sequence future is dropped early.
struct SequenceGuard<'a, E> {
    engine: &'a RetryEngine<E>,
    generation: u64,
}

impl<E> Drop for SequenceGuard<'_, E> {
    fn drop(&mut self) {
        self.engine.update(self.generation, |state| {
            state.is_retrying = false;
            state.cancel = None;
        });
    }
}

fn summary_message(history: &[AttemptRecord]) -> &str {
    history.last().map(|r| r.message.as_str()).unwrap_or_default()
}

fn whole_millis(d: Duration) -> Duration {
    Duration::from_millis(d.as_millis() as u64)
}
