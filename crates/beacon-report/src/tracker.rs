//! Error reporting tracker.
//!
//! Each consumer (a view, a data hook, a form) owns its own [`ErrorTracker`].
//! Every report is classified, stored in a most-recent-first history capped
//! at [`MAX_ERROR_HISTORY`] entries, counted, optionally logged and optionally
//! forwarded to an external reporter. Reporting never fails.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use beacon_core::classify::{classify_with, Classify, ClassifyContext, ErrorKind, Thrown};
use beacon_core::{BeaconError, ReportingConfig};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{error, info, warn};

/// Maximum number of reports kept per tracker.
pub const MAX_ERROR_HISTORY: usize = 50;

/// Number of reports included in [`ErrorStats::recent_errors`].
pub const RECENT_ERRORS: usize = 10;

/// Free-form key/value context attached to a report.
pub type ReportContext = Map<String, Value>;

/// Callback that ships a report somewhere outside the process.
pub type ExternalReporter = Arc<dyn Fn(&ErrorReport) -> anyhow::Result<()> + Send + Sync>;

/// Report severity level.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational - not really an error, just noteworthy
    Info,
    /// Warning - something went wrong but the operation continues
    Warning,
    /// Error - an operation failed
    #[default]
    Error,
    /// Critical - the consumer cannot continue
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A single recorded error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub timestamp: DateTime<Utc>,
    pub component: String,
    pub module: Option<String>,
    pub severity: Severity,
    pub error_kind: ErrorKind,
    pub message: String,
    pub user_friendly_message: String,
    pub stack_trace: Option<String>,
    pub context: ReportContext,
    /// Value of the tracker's running counter after this report
    pub error_count: u64,
}

impl ErrorReport {
    /// Label used in log lines, derived from the context `type` and severity.
    pub fn label(&self) -> &'static str {
        match self.context.get("type").and_then(Value::as_str) {
            Some("network") => "Network Error",
            Some("validation") => "Validation Error",
            _ => match self.severity {
                Severity::Warning => "Warning",
                Severity::Info => "Info",
                Severity::Error | Severity::Critical => "Error",
            },
        }
    }
}

/// Error-like value rebuilt from a stored report.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message}")]
pub struct ReplayedError {
    pub message: String,
}

/// Entry in [`ErrorStats::recent_errors`].
#[derive(Debug, Clone, Serialize)]
pub struct RecentError {
    pub timestamp: DateTime<Utc>,
    pub error: ReplayedError,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub component: String,
}

/// Snapshot of a tracker's statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorStats {
    /// Running counter (reports since creation or last clear)
    pub total_errors: u64,
    /// Reports in history younger than 24 hours
    pub errors_last_24h: usize,
    /// Reports in history per kind; base kinds always present
    pub by_kind: BTreeMap<ErrorKind, usize>,
    /// Reports in history per severity
    pub by_severity: BTreeMap<Severity, usize>,
    pub most_recent: Option<ErrorReport>,
    /// Up to [`RECENT_ERRORS`] reports, most recent first
    pub recent_errors: Vec<RecentError>,
}

/// Tracker configuration.
#[derive(Clone)]
pub struct TrackerOptions {
    /// Owning component name, used in every report and log line
    pub component: String,
    pub module: Option<String>,
    pub enable_console_logging: bool,
    pub enable_external_reporting: bool,
    pub external_reporter: Option<ExternalReporter>,
    pub max_history: usize,
}

impl fmt::Debug for TrackerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerOptions")
            .field("component", &self.component)
            .field("module", &self.module)
            .field("enable_console_logging", &self.enable_console_logging)
            .field("enable_external_reporting", &self.enable_external_reporting)
            .field("external_reporter", &self.external_reporter.is_some())
            .field("max_history", &self.max_history)
            .finish()
    }
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            component: "Unknown".to_string(),
            module: None,
            enable_console_logging: true,
            enable_external_reporting: false,
            external_reporter: None,
            max_history: MAX_ERROR_HISTORY,
        }
    }
}

impl TrackerOptions {
    /// Options for a named component with default settings.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            ..Self::default()
        }
    }

    /// Options for a named component taken from the `reporting` config section.
    pub fn from_config(component: impl Into<String>, config: &ReportingConfig) -> Self {
        Self {
            component: component.into(),
            enable_console_logging: config.console_logging,
            max_history: config.max_history.max(1),
            ..Self::default()
        }
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn without_console_logging(mut self) -> Self {
        self.enable_console_logging = false;
        self
    }

    /// Install an external reporter and enable external reporting.
    pub fn with_external_reporter<F>(mut self, reporter: F) -> Self
    where
        F: Fn(&ErrorReport) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.external_reporter = Some(Arc::new(reporter));
        self.enable_external_reporting = true;
        self
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    /// Most recent first
    history: VecDeque<ErrorReport>,
    error_count: u64,
}

/// Per-consumer error tracker. Cloning shares the same history.
#[derive(Debug, Clone)]
pub struct ErrorTracker {
    options: Arc<TrackerOptions>,
    state: Arc<Mutex<TrackerState>>,
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new(TrackerOptions::default())
    }
}

impl ErrorTracker {
    pub fn new(options: TrackerOptions) -> Self {
        Self {
            options: Arc::new(options),
            state: Arc::new(Mutex::new(TrackerState::default())),
        }
    }

    /// Tracker for a named component with default options.
    pub fn for_component(component: impl Into<String>) -> Self {
        Self::new(TrackerOptions::new(component))
    }

    pub fn options(&self) -> &TrackerOptions {
        &self.options
    }

    /// Record an error. Returns the stored report.
    pub fn report_error<E: Classify + ?Sized>(
        &self,
        error: &E,
        context: Option<ReportContext>,
        severity: Severity,
    ) -> ErrorReport {
        let context = context.unwrap_or_default();
        let hint = match context.get("type").and_then(Value::as_str) {
            Some("validation") => ClassifyContext::validation(),
            Some("component") => ClassifyContext::component(),
            Some("network") => ClassifyContext::network(),
            _ => ClassifyContext::default(),
        };

        let thrown = error.thrown();
        let classification = classify_with(&thrown, hint);
        let message = error
            .message()
            .unwrap_or_else(|| classification.user_message.clone());
        let stack_trace = context
            .get("componentStack")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| stack_trace_of(&thrown));

        let report = {
            let mut state = self.lock();
            state.error_count += 1;

            let report = ErrorReport {
                timestamp: Utc::now(),
                component: self.options.component.clone(),
                module: self.options.module.clone(),
                severity,
                error_kind: classification.kind,
                message,
                user_friendly_message: classification.user_message,
                stack_trace,
                context,
                error_count: state.error_count,
            };

            state.history.push_front(report.clone());
            state.history.truncate(self.options.max_history);
            report
        };

        if self.options.enable_console_logging {
            log_report(&report);
        }

        if self.options.enable_external_reporting
            && let Some(reporter) = &self.options.external_reporter
            && let Err(e) = reporter(&report)
        {
            warn!(
                component = %self.options.component,
                error = %e,
                "external error reporter failed"
            );
        }

        report
    }

    /// Record a failed call to a backend endpoint.
    pub fn report_network_error<E: Classify + ?Sized>(&self, error: &E, endpoint: &str) -> ErrorReport {
        let context = context_map(json!({
            "type": "network",
            "endpoint": endpoint,
        }));
        self.report_error(error, Some(context), Severity::Error)
    }

    /// Record a rejected form submission.
    pub fn report_validation_error<E: Classify + ?Sized>(
        &self,
        error: &E,
        form_data: &Value,
        field: Option<&str>,
    ) -> ErrorReport {
        let context = context_map(json!({
            "type": "validation",
            "formData": form_data,
            "field": field,
        }));
        self.report_error(error, Some(context), Severity::Warning)
    }

    /// Record a failure raised while rendering a component.
    pub fn report_component_error<E: Classify + ?Sized>(
        &self,
        error: &E,
        component_stack: Option<&str>,
    ) -> ErrorReport {
        let mut context = context_map(json!({ "type": "component" }));
        if let Some(stack) = component_stack {
            context.insert("componentStack".into(), Value::String(stack.to_string()));
        }
        self.report_error(error, Some(context), Severity::Error)
    }

    /// Statistics over the current history.
    pub fn get_error_stats(&self) -> ErrorStats {
        let state = self.lock();
        let cutoff = Utc::now() - Duration::hours(24);

        let mut by_kind: BTreeMap<ErrorKind, usize> =
            ErrorKind::BASE.iter().map(|k| (*k, 0)).collect();
        let mut by_severity: BTreeMap<Severity, usize> = BTreeMap::new();
        for report in &state.history {
            *by_kind.entry(report.error_kind).or_insert(0) += 1;
            *by_severity.entry(report.severity).or_insert(0) += 1;
        }

        let recent_errors = state
            .history
            .iter()
            .take(RECENT_ERRORS)
            .map(|r| RecentError {
                timestamp: r.timestamp,
                error: ReplayedError {
                    message: r.message.clone(),
                },
                kind: r.error_kind,
                severity: r.severity,
                component: r.component.clone(),
            })
            .collect();

        ErrorStats {
            total_errors: state.error_count,
            errors_last_24h: state.history.iter().filter(|r| r.timestamp > cutoff).count(),
            by_kind,
            by_severity,
            most_recent: state.history.front().cloned(),
            recent_errors,
        }
    }

    /// Drop the history and reset the running counter.
    pub fn clear_error_stats(&self) {
        let mut state = self.lock();
        state.history.clear();
        state.error_count = 0;
    }

    /// Copy of the history, most recent first.
    pub fn history(&self) -> Vec<ErrorReport> {
        self.lock().history.iter().cloned().collect()
    }

    /// Serialize the history as pretty-printed JSON for support tickets.
    pub fn export_error_history(&self) -> beacon_core::Result<String> {
        let stats = self.get_error_stats();
        let history = self.history();
        let document = HistoryExport {
            exported_at: Utc::now(),
            component: &self.options.component,
            module: self.options.module.as_deref(),
            total_errors: stats.total_errors,
            errors_last_24h: stats.errors_last_24h,
            by_kind: &stats.by_kind,
            history: &history,
        };
        serde_json::to_string_pretty(&document)
            .map_err(|e| BeaconError::json("error history export", e))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryExport<'a> {
    exported_at: DateTime<Utc>,
    component: &'a str,
    module: Option<&'a str>,
    total_errors: u64,
    errors_last_24h: usize,
    by_kind: &'a BTreeMap<ErrorKind, usize>,
    history: &'a [ErrorReport],
}

fn context_map(value: Value) -> ReportContext {
    match value {
        Value::Object(map) => map,
        _ => ReportContext::new(),
    }
}

/// Source chain for typed errors, or a `stack` field for JSON payloads.
fn stack_trace_of(thrown: &Thrown<'_>) -> Option<String> {
    match thrown {
        Thrown::Error(e) => {
            let mut lines = Vec::new();
            let mut current = e.source();
            while let Some(cause) = current {
                lines.push(format!("caused by: {cause}"));
                current = cause.source();
            }
            (!lines.is_empty()).then(|| lines.join("\n"))
        }
        Thrown::Value(Value::Object(map)) => {
            map.get("stack").and_then(Value::as_str).map(str::to_string)
        }
        _ => None,
    }
}

fn log_report(report: &ErrorReport) {
    let label = report.label();
    let module = report.module.as_deref().unwrap_or("-");
    match report.severity {
        Severity::Critical | Severity::Error => error!(
            component = %report.component,
            module,
            kind = %report.error_kind,
            error_count = report.error_count,
            "[{}] {}: {}",
            report.component,
            label,
            report.message
        ),
        Severity::Warning => warn!(
            component = %report.component,
            module,
            kind = %report.error_kind,
            error_count = report.error_count,
            "[{}] {}: {}",
            report.component,
            label,
            report.message
        ),
        Severity::Info => info!(
            component = %report.component,
            module,
            kind = %report.error_kind,
            error_count = report.error_count,
            "[{}] {}: {}",
            report.component,
            label,
            report.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quiet(component: &str) -> ErrorTracker {
        ErrorTracker::new(TrackerOptions::new(component).without_console_logging())
    }

    #[test]
    fn test_report_error_records_and_counts() {
        let tracker = quiet("ProfileEditor");
        let report = tracker.report_error("Save failed", None, Severity::Error);

        assert_eq!(report.component, "ProfileEditor");
        assert_eq!(report.error_kind, ErrorKind::General);
        assert_eq!(report.message, "Save failed");
        assert_eq!(report.error_count, 1);

        let stats = tracker.get_error_stats();
        assert_eq!(stats.total_errors, 1);
        assert_eq!(stats.errors_last_24h, 1);
        assert_eq!(stats.by_kind[&ErrorKind::General], 1);
        assert_eq!(stats.by_severity[&Severity::Error], 1);
    }

    #[test]
    fn test_base_kinds_zero_initialized() {
        let stats = quiet("Empty").get_error_stats();
        assert_eq!(stats.total_errors, 0);
        for kind in ErrorKind::BASE {
            assert_eq!(stats.by_kind[&kind], 0);
        }
        assert!(stats.most_recent.is_none());
        assert!(stats.recent_errors.is_empty());
    }

    #[test]
    fn test_history_is_bounded_and_most_recent_first() {
        let tracker = quiet("LinkList");
        for i in 0..60 {
            tracker.report_error(&format!("failure {i}"), None, Severity::Error);
        }

        let history = tracker.history();
        assert_eq!(history.len(), MAX_ERROR_HISTORY);
        assert_eq!(history[0].message, "failure 59");
        assert_eq!(history[MAX_ERROR_HISTORY - 1].message, "failure 10");

        let stats = tracker.get_error_stats();
        assert_eq!(stats.total_errors, 60);
        assert_eq!(stats.recent_errors.len(), RECENT_ERRORS);
        assert_eq!(stats.recent_errors[0].error.to_string(), "failure 59");
        assert_eq!(stats.most_recent.unwrap().error_count, 60);
    }

    #[test]
    fn test_clear_resets_counter() {
        let tracker = quiet("LinkList");
        tracker.report_error("a", None, Severity::Error);
        tracker.report_error("b", None, Severity::Error);
        tracker.clear_error_stats();

        assert_eq!(tracker.get_error_stats().total_errors, 0);
        let report = tracker.report_error("c", None, Severity::Error);
        assert_eq!(report.error_count, 1);
    }

    #[test]
    fn test_network_report() {
        let tracker = quiet("Dashboard");
        let report = tracker.report_network_error("request failed", "/rest/v1/links");

        assert_eq!(report.error_kind, ErrorKind::Network);
        assert_eq!(report.context["endpoint"], "/rest/v1/links");
        assert_eq!(report.label(), "Network Error");
    }

    #[test]
    fn test_validation_report() {
        let tracker = quiet("LinkForm");
        let form = json!({"title": "", "url": "ftp://x"});
        let report = tracker.report_validation_error("Title is required", &form, Some("title"));

        assert_eq!(report.error_kind, ErrorKind::Validation);
        assert_eq!(report.severity, Severity::Warning);
        assert_eq!(report.context["field"], "title");
        assert_eq!(report.context["formData"]["url"], "ftp://x");
        assert_eq!(report.label(), "Validation Error");
    }

    #[test]
    fn test_component_report_keeps_stack() {
        let tracker = quiet("LinkCard");
        let report = tracker.report_component_error("render failed", Some("at LinkCard\nat LinkList"));

        assert_eq!(report.error_kind, ErrorKind::Component);
        assert_eq!(report.stack_trace.as_deref(), Some("at LinkCard\nat LinkList"));
    }

    #[test]
    fn test_labels_follow_severity() {
        let tracker = quiet("Settings");
        assert_eq!(tracker.report_error("x", None, Severity::Warning).label(), "Warning");
        assert_eq!(tracker.report_error("y", None, Severity::Info).label(), "Info");
        assert_eq!(tracker.report_error("z", None, Severity::Critical).label(), "Error");
    }

    #[test]
    fn test_non_message_value_uses_fallback() {
        let tracker = quiet("Settings");
        let report = tracker.report_error(&json!(404), None, Severity::Error);
        assert_eq!(report.message, beacon_core::classify::GENERIC_MESSAGE);
    }

    #[test]
    fn test_external_reporter_called() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let tracker = ErrorTracker::new(
            TrackerOptions::new("Analytics")
                .without_console_logging()
                .with_external_reporter(move |report| {
                    assert_eq!(report.component, "Analytics");
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
        );

        tracker.report_error("boom", None, Severity::Error);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_external_reporter_failure_is_swallowed() {
        let tracker = ErrorTracker::new(
            TrackerOptions::new("Analytics")
                .without_console_logging()
                .with_external_reporter(|_| anyhow::bail!("collector offline")),
        );

        let report = tracker.report_error("boom", None, Severity::Error);
        assert_eq!(report.error_count, 1);
        assert_eq!(tracker.history().len(), 1);
    }

    #[test]
    fn test_external_reporter_disabled_flag() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut options = TrackerOptions::new("Analytics")
            .without_console_logging()
            .with_external_reporter(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        options.enable_external_reporting = false;

        ErrorTracker::new(options).report_error("boom", None, Severity::Error);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_trackers_are_independent() {
        let a = quiet("A");
        let b = quiet("B");
        a.report_error("x", None, Severity::Error);
        assert_eq!(a.get_error_stats().total_errors, 1);
        assert_eq!(b.get_error_stats().total_errors, 0);

        let a2 = a.clone();
        a2.report_error("y", None, Severity::Error);
        assert_eq!(a.get_error_stats().total_errors, 2);
    }

    #[test]
    fn test_io_source_chain_becomes_stack_trace() {
        let tracker = quiet("Upload");
        let err = anyhow::Error::new(std::io::Error::other("disk full")).context("avatar upload");
        let report = tracker.report_error(&err, None, Severity::Error);

        assert_eq!(report.message, "avatar upload");
        assert_eq!(report.stack_trace.as_deref(), Some("caused by: disk full"));
    }

    #[test]
    fn test_export_history_is_json() {
        let tracker = quiet("Export");
        tracker.report_error("first", None, Severity::Error);
        tracker.report_network_error("second", "/auth");

        let exported = tracker.export_error_history().unwrap();
        let parsed: Value = serde_json::from_str(&exported).unwrap();
        assert_eq!(parsed["component"], "Export");
        assert_eq!(parsed["totalErrors"], 2);
        assert_eq!(parsed["history"].as_array().unwrap().len(), 2);
        assert_eq!(parsed["history"][0]["errorKind"], "network");
        assert_eq!(parsed["byKind"]["network"], 1);
    }

    #[test]
    fn test_options_from_config() {
        let config = ReportingConfig {
            max_history: 3,
            console_logging: false,
        };
        let tracker = ErrorTracker::new(TrackerOptions::from_config("Cfg", &config));
        for i in 0..5 {
            tracker.report_error(&format!("e{i}"), None, Severity::Info);
        }
        assert_eq!(tracker.history().len(), 3);
        assert!(!tracker.options().enable_console_logging);
    }
}
