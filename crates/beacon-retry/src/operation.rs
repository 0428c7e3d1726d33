//! Async operation wrapper.
//!
//! [`AsyncOperation`] wraps one async operation with loading/error/data
//! state, automatic retries on failure and error reporting through an
//! [`ErrorTracker`]. It is what a view holds when it needs "run this, show a
//! spinner, show the error, let the user retry".

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use beacon_core::classify::{Classify, ErrorKind};
use beacon_report::{ErrorTracker, ReportContext, Severity};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::engine::{ErrorSummary, RetryEngine, RetryError, RetryOptions};

/// A repeatable async operation.
pub type BoxedOperation<T, E> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// Called with the final failure of an execution.
pub type OnError = Arc<dyn Fn(&ErrorSummary) -> anyhow::Result<()> + Send + Sync>;

/// Options for an [`AsyncOperation`].
#[derive(Clone)]
pub struct AsyncOptions {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base delay; doubles on every retry
    pub retry_delay: Duration,
    pub on_error: Option<OnError>,
    /// Extra context attached to every report
    pub context: ReportContext,
    /// Start executing the bound operation on construction
    pub immediate: bool,
}

impl Default for AsyncOptions {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay: Duration::from_millis(1000),
            on_error: None,
            context: ReportContext::new(),
            immediate: false,
        }
    }
}

impl fmt::Debug for AsyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOptions")
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("on_error", &self.on_error.is_some())
            .field("context", &self.context)
            .field("immediate", &self.immediate)
            .finish()
    }
}

impl AsyncOptions {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ErrorSummary) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }
}

/// Observable state of an [`AsyncOperation`].
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncState<T> {
    pub loading: bool,
    pub error: Option<ErrorSummary>,
    pub data: Option<T>,
    /// True while a retry attempt (automatic or manual) is running
    pub is_retrying: bool,
    /// Retries performed in the current execution
    pub retry_count: u32,
    /// Only network failures are offered a manual retry
    pub can_retry: bool,
}

/// Failure of [`AsyncOperation::execute`].
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    #[error("no operation to execute")]
    NoOperation,
    #[error(transparent)]
    Failed(#[from] RetryError<E>),
}

impl<E> ExecuteError<E> {
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            ExecuteError::NoOperation => None,
            ExecuteError::Failed(e) => e.operation_error(),
        }
    }
}

struct OpState<T, E> {
    loading: bool,
    error: Option<ErrorSummary>,
    data: Option<T>,
    is_retrying: bool,
    manual_retry: bool,
    retry_count: u32,
    last_operation: Option<BoxedOperation<T, E>>,
    /// Bumped by `reset`; a run started under an older value leaves state alone
    generation: u64,
}

impl<T, E> Default for OpState<T, E> {
    fn default() -> Self {
        Self {
            loading: false,
            error: None,
            data: None,
            is_retrying: false,
            manual_retry: false,
            retry_count: 0,
            last_operation: None,
            generation: 0,
        }
    }
}

struct Inner<T, E> {
    engine: RetryEngine<E>,
    tracker: ErrorTracker,
    options: AsyncOptions,
    bound: Option<BoxedOperation<T, E>>,
    state: Mutex<OpState<T, E>>,
}

/// An async operation with loading state, retries and error reporting.
///
/// Cloning shares state.
pub struct AsyncOperation<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for AsyncOperation<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for AsyncOperation<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOperation")
            .field("options", &self.inner.options)
            .field("bound", &self.inner.bound.is_some())
            .finish_non_exhaustive()
    }
}

impl<T, E> AsyncOperation<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Classify + Send + Sync + 'static,
{
    /// Operation with no bound function; pass one to
    /// [`execute_with`](Self::execute_with).
    pub fn new(tracker: ErrorTracker, options: AsyncOptions) -> Self {
        Self::build(None, tracker, options)
    }

    /// Operation bound to `op`. With `options.immediate` it starts running
    /// right away on the current tokio runtime.
    pub fn bound<F, Fut>(op: F, tracker: ErrorTracker, options: AsyncOptions) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let this = Self::build(Some(boxed(op)), tracker, options);
        if this.inner.options.immediate {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let runner = this.clone();
                    handle.spawn(async move {
                        let _ = runner.execute().await;
                    });
                }
                Err(_) => warn!("immediate execution requested outside a tokio runtime; skipped"),
            }
        }
        this
    }

    fn build(bound: Option<BoxedOperation<T, E>>, tracker: ErrorTracker, options: AsyncOptions) -> Self {
        let base = options.retry_delay;
        let retry = RetryOptions::default()
            .with_max_attempts(options.max_retries.saturating_add(1))
            .with_delay(base)
            .with_max_delay(Duration::from_millis(u64::MAX));

        Self {
            inner: Arc::new(Inner {
                engine: RetryEngine::new(retry),
                tracker,
                options,
                bound,
                state: Mutex::new(OpState::default()),
            }),
        }
    }

    /// Run the bound operation.
    pub async fn execute(&self) -> Result<T, ExecuteError<E>> {
        let op = self.inner.bound.clone().ok_or(ExecuteError::NoOperation)?;
        self.run(op, false).await
    }

    /// Run `op` in place of the bound operation. It becomes the target of
    /// later [`retry`](Self::retry) calls.
    pub async fn execute_with<F, Fut>(&self, op: F) -> Result<T, ExecuteError<E>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.run(boxed(op), false).await
    }

    /// Re-run the most recently executed operation.
    pub async fn retry(&self) -> Result<T, ExecuteError<E>> {
        let last = self.lock().last_operation.clone();
        let op = last
            .or_else(|| self.inner.bound.clone())
            .ok_or(ExecuteError::NoOperation)?;
        self.run(op, true).await
    }

    /// Back to idle: no data, no error, no retries. Cancels a running
    /// execution.
    pub fn reset(&self) {
        self.inner.engine.reset();
        let mut state = self.lock();
        let last_operation = state.last_operation.take();
        let generation = state.generation.wrapping_add(1);
        *state = OpState {
            last_operation,
            generation,
            ..OpState::default()
        };
    }

    pub fn state(&self) -> AsyncState<T> {
        let state = self.lock();
        let can_retry = !state.loading
            && state
                .error
                .as_ref()
                .is_some_and(|e| e.kind == ErrorKind::Network);
        AsyncState {
            loading: state.loading,
            error: state.error.clone(),
            data: state.data.clone(),
            is_retrying: state.is_retrying,
            retry_count: state.retry_count,
            can_retry,
        }
    }

    pub fn tracker(&self) -> &ErrorTracker {
        &self.inner.tracker
    }

    async fn run(&self, op: BoxedOperation<T, E>, manual_retry: bool) -> Result<T, ExecuteError<E>> {
        if self.inner.engine.is_retrying() {
            return Err(RetryError::InProgress.into());
        }

        let generation = {
            let mut state = self.lock();
            state.loading = true;
            state.error = None;
            state.retry_count = 0;
            state.manual_retry = manual_retry;
            state.is_retrying = manual_retry;
            state.last_operation = Some(Arc::clone(&op));
            state.generation
        };

        let inner = Arc::clone(&self.inner);
        let result = self
            .inner
            .engine
            .retry(|| {
                let op = Arc::clone(&op);
                let inner = Arc::clone(&inner);
                async move {
                    let attempt = inner.engine.attempt_count();
                    {
                        let mut state = lock_state(&inner.state);
                        if state.generation == generation {
                            state.retry_count = attempt.saturating_sub(1);
                            state.is_retrying = state.manual_retry || attempt > 1;
                        }
                    }
                    let result = op().await;
                    if let Err(error) = &result {
                        inner.report_attempt(error, attempt);
                    }
                    result
                }
            })
            .await;

        match result {
            Ok(value) => {
                let mut state = self.lock();
                if state.generation == generation {
                    state.loading = false;
                    state.error = None;
                    state.is_retrying = false;
                    state.data = Some(value.clone());
                }
                Ok(value)
            }
            Err(RetryError::InProgress) => Err(RetryError::InProgress.into()),
            Err(error) => {
                let summary = ErrorSummary::of(&error);
                {
                    let mut state = self.lock();
                    if state.generation != generation {
                        debug!(kind = %summary.kind, "execution superseded by reset");
                        return Err(error.into());
                    }
                    state.loading = false;
                    state.is_retrying = false;
                    state.error = Some(summary.clone());
                }
                if let Some(on_error) = &self.inner.options.on_error
                    && let Err(e) = on_error(&summary)
                {
                    warn!(error = %e, "on_error callback failed");
                }
                debug!(kind = %summary.kind, attempts = error.attempt_count(), "async operation failed");
                Err(error.into())
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, OpState<T, E>> {
        lock_state(&self.inner.state)
    }
}

impl<T, E: Classify> Inner<T, E> {
    fn report_attempt(&self, error: &E, attempt: u32) {
        let mut context = ReportContext::new();
        context.insert("action".into(), Value::from("async execution"));
        context.insert("attempt".into(), Value::from(attempt));
        context.insert("maxRetries".into(), Value::from(self.options.max_retries));
        context.insert("context".into(), Value::Object(self.options.context.clone()));
        self.tracker.report_error(error, Some(context), Severity::Error);
    }
}

fn lock_state<T, E>(state: &Mutex<OpState<T, E>>) -> MutexGuard<'_, OpState<T, E>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn boxed<T, E, F, Fut>(op: F) -> BoxedOperation<T, E>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    Arc::new(move || op().boxed())
}
