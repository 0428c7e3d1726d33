//! # beacon-report
//!
//! Per-consumer error reporting for Beacon.
//!
//! An [`ErrorTracker`] is a sink: it classifies, records, logs and optionally
//! forwards errors, and it never fails.
//!
//! ```
//! use beacon_report::{ErrorTracker, Severity, TrackerOptions};
//!
//! let tracker = ErrorTracker::new(TrackerOptions::new("LinkEditor").without_console_logging());
//! tracker.report_network_error("connect ECONNREFUSED", "/rest/v1/links");
//! tracker.report_error("Title is too long", None, Severity::Warning);
//!
//! let stats = tracker.get_error_stats();
//! assert_eq!(stats.total_errors, 2);
//! ```

pub mod tracker;

pub use tracker::{
    ErrorReport, ErrorStats, ErrorTracker, ExternalReporter, RecentError, ReplayedError,
    ReportContext, Severity, TrackerOptions, MAX_ERROR_HISTORY, RECENT_ERRORS,
};
