//! # beacon-alert
//!
//! In-app notifications for Beacon.
//!
//! - [`AlertQueue`] - priority-ordered, deduplicated, capacity-bounded queue
//!   with auto-dismiss timers and Escape-key dismissal
//! - [`view::AlertStack`] - ratatui widget that draws a queue snapshot
//!
//! ## Example
//!
//! ```
//! use beacon_alert::{AlertKind, AlertQueue, AlertRequest, Priority};
//!
//! let queue = AlertQueue::default();
//! queue.show_error(("Sync failed", "Could not reach the server"));
//! queue.show(
//!     AlertRequest::new(AlertKind::Warning, "Session expires soon")
//!         .with_priority(Priority::High)
//!         .persistent(),
//! );
//! assert_eq!(queue.len(), 2);
//! ```

pub mod alert;
pub mod queue;
pub mod view;

pub use alert::{
    Alert, AlertAction, AlertContent, AlertError, AlertId, AlertKind, AlertRequest, AlertUpdate,
    Position, Priority, Variant,
};
pub use queue::{AlertQueue, QueueSettings};
pub use view::AlertStack;
