//! End-to-end retry tests for beacon-retry.
//!
//! These run on a paused tokio clock, so backoff waits complete instantly
//! while their ordering and length stay observable.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use beacon_core::classify::{classify, ErrorKind};
use beacon_report::{ErrorTracker, TrackerOptions};
use beacon_retry::{AsyncOperation, AsyncOptions, RetryEngine, RetryError, RetryOptions};
use tokio::time::Instant;

fn quiet_tracker(component: &str) -> ErrorTracker {
    ErrorTracker::new(TrackerOptions::new(component).without_console_logging())
}

#[cfg(test)]
mod retry_engine {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_exhausts_budget() {
        let engine = RetryEngine::new(
            RetryOptions::default()
                .with_max_attempts(3)
                .with_delay(Duration::from_millis(100)),
        );
        let err = engine
            .retry(|| async { Err::<(), _>("connect ECONNREFUSED".to_string()) })
            .await
            .unwrap_err();

        assert!(err.max_attempts_reached());
        assert_eq!(err.attempt_count(), 3);
        assert_eq!(err.retry_history().len(), 3);
        let numbers: Vec<u32> = err.retry_history().iter().map(|r| r.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(err
            .retry_history()
            .iter()
            .all(|r| r.error_kind == ErrorKind::Network));

        let snap = engine.snapshot();
        assert!(!snap.is_retrying);
        assert!(snap.max_attempts_reached);
        assert!(!snap.can_retry);
        assert_eq!(snap.retry_stats.failed_attempts, 3);
        assert_eq!(snap.retry_stats.remaining_attempts, 0);
        assert_eq!(snap.retry_stats.average_retry_delay, Duration::from_millis(100));
        assert_eq!(
            snap.last_error.map(|e| e.kind),
            Some(ErrorKind::Network)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_grow_between_attempts() {
        let engine = RetryEngine::new(
            RetryOptions::default()
                .with_max_attempts(4)
                .with_delay(Duration::from_millis(100)),
        );
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let _ = engine
            .retry(|| {
                calls.lock().unwrap().push(Instant::now());
                async { Err::<(), _>("boom".to_string()) }
            })
            .await;

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps[0] >= Duration::from_millis(100));
        assert!(gaps[1] >= Duration::from_millis(200));
        assert!(gaps[2] >= Duration::from_millis(400));
        assert!(gaps.windows(2).all(|w| w[1] > w[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let engine = RetryEngine::new(
            RetryOptions::default()
                .with_max_attempts(5)
                .with_delay(Duration::from_millis(50)),
        );
        let calls = AtomicU32::new(0);
        let value = engine
            .retry(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err("socket hang up".to_string())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        let snap = engine.snapshot();
        assert_eq!(snap.attempt_count, 3);
        assert!(snap.last_error.is_none());
        assert_eq!(snap.retry_history.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callbacks_fire() {
        let retries = Arc::new(Mutex::new(Vec::new()));
        let exhausted = Arc::new(AtomicU32::new(0));

        let seen = Arc::clone(&retries);
        let count = Arc::clone(&exhausted);
        let engine = RetryEngine::new(
            RetryOptions::default()
                .with_max_attempts(3)
                .with_delay(Duration::from_millis(10))
                .on_retry_attempt(move |_, attempt, delay| {
                    seen.lock().unwrap().push((attempt, delay));
                })
                .on_max_attempts_exceeded(move |_, history| {
                    assert_eq!(history.len(), 3);
                    count.fetch_add(1, Ordering::SeqCst);
                }),
        );

        let _ = engine
            .retry(|| async { Err::<(), _>("boom".to_string()) })
            .await;

        assert_eq!(
            *retries.lock().unwrap(),
            vec![(1, Duration::from_millis(10)), (2, Duration::from_millis(20))]
        );
        assert_eq!(exhausted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_during_backoff() {
        let engine = Arc::new(RetryEngine::new(
            RetryOptions::default()
                .with_max_attempts(5)
                .with_delay(Duration::from_millis(1000)),
        ));
        let calls = Arc::new(AtomicU32::new(0));

        let task = {
            let engine = Arc::clone(&engine);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                engine
                    .retry(|| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async { Err::<(), _>("network error".to_string()) }
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(engine.is_retrying());
        engine.abort();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(classify(&err).kind, ErrorKind::Aborted);
        assert_eq!(err.retry_history().len(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!engine.is_retrying());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_mid_sequence_leaves_clean_state() {
        let engine = Arc::new(RetryEngine::new(
            RetryOptions::default()
                .with_max_attempts(4)
                .with_delay(Duration::from_millis(1000)),
        ));

        let task = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .retry(|| async { Err::<(), _>("Failed to fetch".to_string()) })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.attempt_count(), 1);
        engine.reset();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_aborted());

        let snapshot = engine.snapshot();
        assert!(!snapshot.is_retrying);
        assert_eq!(snapshot.attempt_count, 0);
        assert!(snapshot.retry_history.is_empty());
        assert!(snapshot.last_error.is_none());

        let value = engine.retry(|| async { Ok::<_, String>(9) }).await.unwrap();
        assert_eq!(value, 9);
        assert_eq!(engine.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sequence_rejected() {
        let engine = Arc::new(RetryEngine::new(
            RetryOptions::default()
                .with_max_attempts(3)
                .with_delay(Duration::from_millis(1000)),
        ));

        let first = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .retry(|| async { Err::<(), _>("boom".to_string()) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = engine.retry(|| async { Ok::<_, String>(()) }).await;
        assert!(matches!(second, Err(RetryError::InProgress)));
        assert_eq!(engine.attempt_count(), 1);

        let first = first.await.unwrap().unwrap_err();
        assert_eq!(first.attempt_count(), 3);
    }
}

#[cfg(test)]
mod async_operation {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_recovers_within_retry_budget() {
        let tracker = quiet_tracker("LinkList");
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let op = AsyncOperation::bound(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err("connect ECONNREFUSED 10.0.0.1:443".to_string())
                    } else {
                        Ok("links")
                    }
                }
            },
            tracker.clone(),
            AsyncOptions::default()
                .with_max_retries(2)
                .with_retry_delay(Duration::from_millis(100))
                .with_context("view", "dashboard"),
        );

        let start = Instant::now();
        assert_eq!(op.execute().await.unwrap(), "links");
        assert!(start.elapsed() >= Duration::from_millis(300));

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.get_error_stats().total_errors, 2);

        let history = tracker.history();
        assert_eq!(history[0].context["attempt"], 2);
        assert_eq!(history[1].context["attempt"], 1);
        assert_eq!(history[0].context["action"], "async execution");
        assert_eq!(history[0].context["maxRetries"], 2);
        assert_eq!(history[0].context["context"]["view"], "dashboard");

        let state = op.state();
        assert!(state.error.is_none());
        assert_eq!(state.data, Some("links"));
        assert!(!state.loading);
        assert_eq!(state.retry_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_failure_surfaces_error() {
        let tracker = quiet_tracker("Profile");
        let reported = Arc::new(AtomicU32::new(0));

        let sink = Arc::clone(&reported);
        let op = AsyncOperation::bound(
            || async { Err::<u32, _>("Failed to fetch".to_string()) },
            tracker.clone(),
            AsyncOptions::default()
                .with_max_retries(1)
                .with_retry_delay(Duration::from_millis(10))
                .on_error(move |summary| {
                    assert_eq!(summary.kind, ErrorKind::Network);
                    sink.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
        );

        let err = op.execute().await.unwrap_err();
        assert_eq!(err.operation_error().map(String::as_str), Some("Failed to fetch"));
        assert_eq!(tracker.get_error_stats().total_errors, 2);
        assert_eq!(reported.load(Ordering::SeqCst), 1);

        let state = op.state();
        assert!(!state.loading);
        assert!(state.can_retry);
        assert_eq!(state.error.map(|e| e.kind), Some(ErrorKind::Network));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_while_running_returns_to_idle() {
        let calls = Arc::new(AtomicU32::new(0));
        let failures = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let sink = Arc::clone(&failures);
        let op = AsyncOperation::bound(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>("Failed to fetch".to_string()) }
            },
            quiet_tracker("Analytics"),
            AsyncOptions::default()
                .with_max_retries(3)
                .with_retry_delay(Duration::from_millis(1000))
                .on_error(move |_| {
                    sink.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
        );

        let task = {
            let op = op.clone();
            tokio::spawn(async move { op.execute().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(op.state().loading);
        op.reset();

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(beacon_retry::ExecuteError::Failed(RetryError::Aborted { .. }))
        ));

        let state = op.state();
        assert!(!state.loading);
        assert!(!state.is_retrying);
        assert!(state.error.is_none());
        assert!(state.data.is_none());
        assert_eq!(state.retry_count, 0);
        assert_eq!(failures.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_runs_on_construction() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let op = AsyncOperation::bound(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, String>(5u8) }
            },
            quiet_tracker("Stats"),
            AsyncOptions::default().immediate(),
        );

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(op.state().data, Some(5));
    }
}
