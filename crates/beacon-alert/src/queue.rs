//! Alert queue manager.
//!
//! One [`AlertQueue`] owns the live alert set and the auto-dismiss timers.
//! It is created at application start and handed to producers and views as
//! a cloneable handle.
//!
//! Every operation takes the queue lock once, mutates, then runs the timer
//! reconciliation pass before releasing it:
//!
//! - each live alert with a positive duration gets exactly one timer task
//! - a timer whose alert is no longer live is aborted and dropped
//!
//! Timer tasks hold a weak reference and expire their alert through the same
//! removal path as [`AlertQueue::hide`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use beacon_core::{log_alert_event, AlertConfig};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::alert::{Alert, AlertContent, AlertId, AlertKind, AlertRequest, AlertUpdate, Priority};

/// Queue limits and defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub capacity: usize,
    pub dedup_window: Duration,
    /// Auto-dismiss delay for success, warning and info alerts
    pub default_duration: Duration,
    /// Auto-dismiss delay for error alerts
    pub error_duration: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from(&AlertConfig::default())
    }
}

impl From<&AlertConfig> for QueueSettings {
    fn from(config: &AlertConfig) -> Self {
        Self {
            capacity: config.capacity.max(1),
            dedup_window: Duration::from_millis(config.dedup_window_ms),
            default_duration: Duration::from_millis(config.default_duration_ms),
            error_duration: Duration::from_millis(config.error_duration_ms),
        }
    }
}

impl QueueSettings {
    fn default_duration_for(&self, kind: AlertKind) -> Duration {
        match kind {
            AlertKind::Error => self.error_duration,
            _ => self.default_duration,
        }
    }
}

struct QueueState {
    settings: QueueSettings,
    /// Sorted by (priority, seq)
    alerts: Vec<Alert>,
    timers: HashMap<AlertId, JoinHandle<()>>,
    next_id: u64,
    next_seq: u64,
    shut_down: bool,
}

impl QueueState {
    fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            alerts: Vec::new(),
            timers: HashMap::new(),
            next_id: 1,
            next_seq: 0,
            shut_down: false,
        }
    }

    fn position(&self, id: AlertId) -> Option<usize> {
        self.alerts.iter().position(|a| a.id == id)
    }

    fn sort(&mut self) {
        self.alerts.sort_by_key(|a| (a.priority, a.seq));
    }

    /// Clear the timer, then drop the alert.
    fn remove(&mut self, id: AlertId) -> Option<Alert> {
        if let Some(timer) = self.timers.remove(&id) {
            timer.abort();
        }
        let index = self.position(id)?;
        Some(self.alerts.remove(index))
    }

    /// Evict oldest non-critical alerts, then truncate from the tail.
    fn enforce_capacity(&mut self) -> Vec<AlertId> {
        let capacity = self.settings.capacity;
        let mut evicted = Vec::new();

        while self.alerts.len() > capacity {
            let oldest = self
                .alerts
                .iter()
                .filter(|a| a.priority != Priority::Critical)
                .min_by_key(|a| a.seq)
                .map(|a| a.id);
            match oldest {
                Some(id) => {
                    self.remove(id);
                    evicted.push(id);
                }
                None => break,
            }
        }

        if self.alerts.len() > capacity {
            let tail: Vec<AlertId> = self.alerts[capacity..].iter().map(|a| a.id).collect();
            for id in tail {
                self.remove(id);
                evicted.push(id);
            }
        }

        evicted
    }

    /// Drop oldest excess alerts in insertion order.
    fn trim_fifo(&mut self) -> Vec<AlertId> {
        let mut trimmed = Vec::new();
        while self.alerts.len() > self.settings.capacity {
            let Some(oldest) = self.alerts.iter().min_by_key(|a| a.seq).map(|a| a.id) else {
                break;
            };
            self.remove(oldest);
            trimmed.push(oldest);
        }
        trimmed
    }

    fn clear_timers(&mut self) -> usize {
        let count = self.timers.len();
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        count
    }
}

impl Drop for QueueState {
    fn drop(&mut self) {
        self.clear_timers();
    }
}

/// Shared handle to the alert queue. Clones refer to the same queue.
#[derive(Clone)]
pub struct AlertQueue {
    inner: Arc<Mutex<QueueState>>,
}

impl fmt::Debug for AlertQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("AlertQueue")
            .field("settings", &state.settings)
            .field("alerts", &state.alerts.len())
            .field("timers", &state.timers.len())
            .field("shut_down", &state.shut_down)
            .finish()
    }
}

impl Default for AlertQueue {
    fn default() -> Self {
        Self::new(QueueSettings::default())
    }
}

impl AlertQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueState::new(settings))),
        }
    }

    /// Queue built from the `alerts` config section.
    pub fn from_config(config: &AlertConfig) -> Self {
        Self::new(QueueSettings::from(config))
    }

    pub fn settings(&self) -> QueueSettings {
        self.lock().settings
    }

    /// Enqueue an alert.
    ///
    /// Returns `None` without enqueueing when the message is empty, when an
    /// identical `(message, kind)` alert was shown within the dedup window,
    /// when the new alert is immediately evicted, or after shutdown.
    pub fn show(&self, request: AlertRequest) -> Option<AlertId> {
        if request.message.trim().is_empty() {
            warn!(kind = %request.kind, "ignoring alert with empty message");
            return None;
        }

        let weak = Arc::downgrade(&self.inner);
        let mut state = self.lock();
        if state.shut_down {
            debug!(kind = %request.kind, "alert queue is shut down; dropping alert");
            return None;
        }

        let now = Instant::now();
        let window = state.settings.dedup_window;
        if let Some(existing) = state.alerts.iter().find(|a| {
            a.kind == request.kind
                && a.message == request.message
                && now.duration_since(a.shown_at) < window
        }) {
            log_alert_event!(existing.id.0, "deduplicated");
            return None;
        }

        let id = AlertId(state.next_id);
        state.next_id += 1;
        let seq = state.next_seq;
        state.next_seq += 1;

        let default_duration = state.settings.default_duration_for(request.kind);
        let alert = Alert::from_request(id, seq, request, default_duration);
        log_alert_event!(
            id.0,
            "shown",
            kind = %alert.kind,
            priority = ?alert.priority,
            duration_ms = alert.duration.as_millis() as u64
        );

        state.alerts.push(alert);
        state.sort();
        for evicted in state.enforce_capacity() {
            log_alert_event!(evicted.0, "evicted");
        }
        reconcile(&mut state, &weak);

        state.position(id).map(|_| id)
    }

    pub fn show_success(&self, content: impl Into<AlertContent>) -> Option<AlertId> {
        self.show(AlertRequest::new(AlertKind::Success, content))
    }

    /// Errors are persistent unless the config says otherwise.
    pub fn show_error(&self, content: impl Into<AlertContent>) -> Option<AlertId> {
        self.show(AlertRequest::new(AlertKind::Error, content))
    }

    pub fn show_warning(&self, content: impl Into<AlertContent>) -> Option<AlertId> {
        self.show(AlertRequest::new(AlertKind::Warning, content))
    }

    pub fn show_info(&self, content: impl Into<AlertContent>) -> Option<AlertId> {
        self.show(AlertRequest::new(AlertKind::Info, content))
    }

    /// Enqueue from an untyped kind name. Unknown kinds are logged and
    /// ignored.
    pub fn show_raw(&self, kind: &str, content: impl Into<AlertContent>) -> Option<AlertId> {
        match AlertRequest::parse(kind, content) {
            Ok(request) => self.show(request),
            Err(e) => {
                warn!(error = %e, "ignoring malformed alert");
                None
            }
        }
    }

    /// Dismiss an alert. Returns false if it was not live.
    pub fn hide(&self, id: AlertId) -> bool {
        let weak = Arc::downgrade(&self.inner);
        let mut state = self.lock();
        let removed = dismiss(&mut state, id, &weak);
        if removed {
            log_alert_event!(id.0, "hidden");
        }
        removed
    }

    /// Merge `update` into a live alert. Its timer keeps running.
    pub fn update(&self, id: AlertId, update: AlertUpdate) -> bool {
        let weak = Arc::downgrade(&self.inner);
        let mut state = self.lock();
        let Some(index) = state.position(id) else {
            return false;
        };
        if update.message.as_ref().is_some_and(|m| m.trim().is_empty()) {
            warn!(alert_id = id.0, "ignoring empty message in alert update");
        }
        state.alerts[index].apply(update);
        state.sort();
        log_alert_event!(id.0, "updated");
        reconcile(&mut state, &weak);
        true
    }

    /// Cancel every timer and empty the live set.
    pub fn clear_all(&self) -> usize {
        let mut state = self.lock();
        let timers = state.clear_timers();
        let count = state.alerts.len();
        state.alerts.clear();
        debug!(alerts = count, timers, "cleared all alerts");
        count
    }

    /// Escape dismisses the most recently added live alert if it is
    /// dismissible. Returns the dismissed id.
    pub fn handle_key(&self, key: &KeyEvent) -> Option<AlertId> {
        if key.code != KeyCode::Esc || key.kind == KeyEventKind::Release {
            return None;
        }

        let newest = {
            let state = self.lock();
            state.alerts.iter().max_by_key(|a| a.seq).map(|a| (a.id, a.dismissible))
        };
        match newest {
            Some((id, true)) => self.hide(id).then_some(id),
            Some((id, false)) => {
                log_alert_event!(id.0, "escape ignored (not dismissible)");
                None
            }
            None => None,
        }
    }

    /// Run the alert's action callback outside the queue lock.
    pub fn trigger_action(&self, id: AlertId) -> bool {
        let action = {
            let state = self.lock();
            state
                .position(id)
                .and_then(|index| state.alerts[index].action.clone())
        };
        match action {
            Some(action) => {
                log_alert_event!(id.0, "action triggered", label = %action.label);
                action.trigger();
                true
            }
            None => false,
        }
    }

    /// Copy of the live set in display order.
    pub fn snapshot(&self) -> Vec<Alert> {
        self.lock().alerts.clone()
    }

    pub fn get(&self, id: AlertId) -> Option<Alert> {
        let state = self.lock();
        state.position(id).map(|index| state.alerts[index].clone())
    }

    pub fn len(&self) -> usize {
        self.lock().alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().alerts.is_empty()
    }

    /// Number of registered dismissal timers.
    pub fn pending_timers(&self) -> usize {
        self.lock().timers.len()
    }

    pub fn has_timer(&self, id: AlertId) -> bool {
        self.lock().timers.contains_key(&id)
    }

    /// Cancel every timer. Later `show` calls are ignored; live alerts stay
    /// until cleared.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shut_down = true;
        let timers = state.clear_timers();
        debug!(timers, "alert queue shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    /// Timer path: forget the finishing timer handle and hide, under one lock.
    fn expire(&self, id: AlertId) {
        let weak = Arc::downgrade(&self.inner);
        let mut state = self.lock();
        state.timers.remove(&id);
        if dismiss(&mut state, id, &weak) {
            log_alert_event!(id.0, "expired");
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Remove `id`, trim back to capacity and reconcile timers.
fn dismiss(state: &mut QueueState, id: AlertId, queue: &Weak<Mutex<QueueState>>) -> bool {
    let removed = state.remove(id).is_some();
    for trimmed in state.trim_fifo() {
        log_alert_event!(trimmed.0, "trimmed");
    }
    reconcile(state, queue);
    removed
}

/// Make the timer table match the live set.
fn reconcile(state: &mut QueueState, queue: &Weak<Mutex<QueueState>>) {
    let live: HashSet<AlertId> = state.alerts.iter().map(|a| a.id).collect();
    state.timers.retain(|id, timer| {
        if live.contains(id) {
            true
        } else {
            timer.abort();
            false
        }
    });

    if state.shut_down {
        return;
    }

    let missing: Vec<(AlertId, Duration)> = state
        .alerts
        .iter()
        .filter(|a| !a.duration.is_zero() && !state.timers.contains_key(&a.id))
        .map(|a| (a.id, a.duration))
        .collect();
    if missing.is_empty() {
        return;
    }

    let Ok(runtime) = Handle::try_current() else {
        warn!(
            alerts = missing.len(),
            "no tokio runtime; alerts will not auto-dismiss"
        );
        return;
    };

    for (id, duration) in missing {
        let deadline = Instant::now() + duration;
        let queue = queue.clone();
        let timer = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = queue.upgrade() {
                AlertQueue { inner }.expire(id);
            }
        });
        state.timers.insert(id, timer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyModifiers;

    fn esc() -> KeyEvent {
        KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE)
    }

    #[tokio::test(start_paused = true)]
    async fn test_show_assigns_increasing_ids() {
        let q = AlertQueue::default();
        let a = q.show_info("one").unwrap();
        let b = q.show_info("two").unwrap();
        assert!(b > a);
        assert_eq!(q.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_message_ignored() {
        let q = AlertQueue::default();
        assert!(q.show_info("   ").is_none());
        assert!(q.show_raw("bogus", "hello").is_none());
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_kind_defaults() {
        let q = AlertQueue::default();
        let err = q.show_error("Could not save").unwrap();
        let ok = q.show_success("Saved").unwrap();
        assert!(q.get(err).unwrap().is_persistent());
        assert_eq!(q.get(ok).unwrap().duration, Duration::from_millis(5000));
        assert!(!q.has_timer(err));
        assert!(q.has_timer(ok));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sorted_by_priority_then_insertion() {
        let q = AlertQueue::default();
        q.show(AlertRequest::new(AlertKind::Info, "low").with_priority(Priority::Low));
        q.show(AlertRequest::new(AlertKind::Info, "m1"));
        q.show(AlertRequest::new(AlertKind::Error, "crit").with_priority(Priority::Critical));
        q.show(AlertRequest::new(AlertKind::Info, "m2"));

        let order: Vec<String> = q.snapshot().into_iter().map(|a| a.message).collect();
        assert_eq!(order, vec!["crit", "m1", "m2", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_keeps_timer_and_resorts() {
        let q = AlertQueue::default();
        let first = q.show_info("first").unwrap();
        let second = q.show_info("second").unwrap();
        assert!(q.update(second, AlertUpdate::message("second!").with_priority(Priority::High)));

        let snap = q.snapshot();
        assert_eq!(snap[0].id, second);
        assert_eq!(snap[0].message, "second!");
        assert_eq!(snap[1].id, first);
        assert_eq!(q.pending_timers(), 2);
        assert!(!q.update(AlertId(999), AlertUpdate::default()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_ignores_blank_message() {
        let q = AlertQueue::default();
        let id = q.show_warning("Link limit almost reached").unwrap();
        assert!(q.update(id, AlertUpdate::message("   ").with_title("Heads up")));

        let alert = q.get(id).unwrap();
        assert_eq!(alert.message, "Link limit almost reached");
        assert_eq!(alert.title.as_deref(), Some("Heads up"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_keeps_one_timer_per_alert() {
        let q = AlertQueue::default();
        let short = q
            .show(AlertRequest::new(AlertKind::Info, "short").with_duration(Duration::from_millis(100)))
            .unwrap();
        let long = q
            .show(AlertRequest::new(AlertKind::Info, "long").with_duration(Duration::from_millis(500)))
            .unwrap();
        assert_eq!(q.pending_timers(), 2);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(q.get(short).is_none());
        assert!(!q.has_timer(short));
        assert!(q.has_timer(long));
        assert_eq!(q.pending_timers(), 1);

        let again = q.show_info("next").unwrap();
        assert_eq!(q.pending_timers(), 2);
        assert!(q.has_timer(again));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(q.get(long).is_none());
        assert_eq!(q.pending_timers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_can_schedule_timer() {
        let q = AlertQueue::default();
        let id = q.show_error("sticky").unwrap();
        assert!(!q.has_timer(id));
        q.update(
            id,
            AlertUpdate {
                duration: Some(Duration::from_millis(100)),
                ..AlertUpdate::default()
            },
        );
        assert!(q.has_timer(id));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(q.get(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_escape_respects_dismissible() {
        let q = AlertQueue::default();
        let a = q.show_info("a").unwrap();
        let b = q.show(AlertRequest::new(AlertKind::Warning, "b").not_dismissible()).unwrap();

        assert_eq!(q.handle_key(&esc()), None);
        assert!(q.get(b).is_some());

        q.hide(b);
        assert_eq!(q.handle_key(&esc()), Some(a));
        assert!(q.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_keys_ignored() {
        let q = AlertQueue::default();
        q.show_info("a");
        let key = KeyEvent::new(KeyCode::Char('x'), KeyModifiers::NONE);
        assert_eq!(q.handle_key(&key), None);
        assert_eq!(q.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_timers_and_producers() {
        let q = AlertQueue::default();
        q.show_info("a");
        q.show_info("b");
        q.shutdown();
        assert_eq!(q.pending_timers(), 0);
        assert!(q.show_info("c").is_none());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_without_runtime_no_timers() {
        let q = AlertQueue::default();
        let id = q.show_info("offline").unwrap();
        assert!(q.get(id).is_some());
        assert_eq!(q.pending_timers(), 0);
    }
}
