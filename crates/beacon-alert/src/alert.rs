//! Alert model.
//!
//! An [`Alert`] is a user-facing notification owned by an
//! [`AlertQueue`](crate::AlertQueue). Producers describe what they want with
//! an [`AlertRequest`]; the queue assigns the id, timestamps and defaults.
//!
//! ## Priorities
//!
//! - **Critical**: evicted last when the queue is full
//! - **High** / **Medium** / **Low**: evicted oldest-first
//!
//! Within one priority band, alerts keep insertion order.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

/// Alert identifier. Never reused within a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertId(pub u64);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors raised while building alerts from untyped input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlertError {
    #[error("unknown alert kind '{0}' (expected success, error, warning or info)")]
    UnknownKind(String),

    #[error("alert message is empty")]
    EmptyMessage,
}

/// What the alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Success,
    Error,
    Warning,
    Info,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Success => "success",
            AlertKind::Error => "error",
            AlertKind::Warning => "warning",
            AlertKind::Info => "info",
        }
    }

    /// Get the icon for this kind.
    pub fn icon(&self) -> &'static str {
        match self {
            AlertKind::Success => "✔",
            AlertKind::Error => "✖",
            AlertKind::Warning => "⚠",
            AlertKind::Info => "ℹ",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertKind {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(AlertKind::Success),
            "error" => Ok(AlertKind::Error),
            "warning" => Ok(AlertKind::Warning),
            "info" => Ok(AlertKind::Info),
            _ => Err(AlertError::UnknownKind(s.to_string())),
        }
    }
}

/// Alert priority. Orders critical first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Short marker for compact display.
    pub fn marker(&self) -> &'static str {
        match self {
            Priority::Critical => "!!",
            Priority::High => "!",
            Priority::Medium | Priority::Low => "",
        }
    }
}

/// Presentation hint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[default]
    Toast,
    Banner,
    Inline,
}

/// Placement hint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    #[default]
    TopRight,
    TopLeft,
    TopCenter,
    BottomRight,
    BottomLeft,
    BottomCenter,
}

/// A user-invocable follow-up attached to an alert.
#[derive(Clone)]
pub struct AlertAction {
    pub label: String,
    on_trigger: Arc<dyn Fn() + Send + Sync>,
}

impl AlertAction {
    pub fn new<F>(label: impl Into<String>, on_trigger: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            on_trigger: Arc::new(on_trigger),
        }
    }

    pub fn trigger(&self) {
        (self.on_trigger)()
    }
}

impl fmt::Debug for AlertAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertAction")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Message with an optional heading, as accepted by the convenience
/// producers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertContent {
    pub title: Option<String>,
    pub message: String,
}

impl From<&str> for AlertContent {
    fn from(message: &str) -> Self {
        Self {
            title: None,
            message: message.to_string(),
        }
    }
}

impl From<String> for AlertContent {
    fn from(message: String) -> Self {
        Self {
            title: None,
            message,
        }
    }
}

impl<T: Into<String>, M: Into<String>> From<(T, M)> for AlertContent {
    fn from((title, message): (T, M)) -> Self {
        Self {
            title: Some(title.into()),
            message: message.into(),
        }
    }
}

/// Producer-side description of an alert.
#[derive(Debug, Clone)]
pub struct AlertRequest {
    pub kind: AlertKind,
    pub message: String,
    pub title: Option<String>,
    /// `None` takes the kind's default; zero means persistent
    pub duration: Option<Duration>,
    pub priority: Priority,
    pub dismissible: bool,
    pub variant: Variant,
    pub group_id: Option<String>,
    pub position: Position,
    pub action: Option<AlertAction>,
}

impl AlertRequest {
    pub fn new(kind: AlertKind, content: impl Into<AlertContent>) -> Self {
        let content = content.into();
        Self {
            kind,
            message: content.message,
            title: content.title,
            duration: None,
            priority: Priority::default(),
            dismissible: true,
            variant: Variant::default(),
            group_id: None,
            position: Position::default(),
            action: None,
        }
    }

    /// Build a request from an untyped kind name.
    pub fn parse(kind: &str, content: impl Into<AlertContent>) -> Result<Self, AlertError> {
        let request = Self::new(kind.parse()?, content);
        if request.message.trim().is_empty() {
            return Err(AlertError::EmptyMessage);
        }
        Ok(request)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Never auto-dismiss.
    pub fn persistent(self) -> Self {
        self.with_duration(Duration::ZERO)
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn not_dismissible(mut self) -> Self {
        self.dismissible = false;
        self
    }

    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    pub fn with_action<F>(mut self, label: impl Into<String>, on_trigger: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.action = Some(AlertAction::new(label, on_trigger));
        self
    }
}

/// A live alert.
#[derive(Debug, Clone)]
pub struct Alert {
    pub id: AlertId,
    pub kind: AlertKind,
    pub message: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Zero means persistent
    pub duration: Duration,
    pub priority: Priority,
    pub dismissible: bool,
    pub variant: Variant,
    pub group_id: Option<String>,
    pub position: Position,
    pub action: Option<AlertAction>,
    /// Insertion sequence, the tie-break within a priority band
    pub(crate) seq: u64,
    /// Monotonic creation time for the dedup window
    pub(crate) shown_at: Instant,
}

impl Alert {
    pub(crate) fn from_request(
        id: AlertId,
        seq: u64,
        request: AlertRequest,
        default_duration: Duration,
    ) -> Self {
        Self {
            id,
            kind: request.kind,
            message: request.message,
            title: request.title,
            created_at: Utc::now(),
            duration: request.duration.unwrap_or(default_duration),
            priority: request.priority,
            dismissible: request.dismissible,
            variant: request.variant,
            group_id: request.group_id,
            position: request.position,
            action: request.action,
            seq,
            shown_at: Instant::now(),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.duration.is_zero()
    }

    /// Insertion order within the owning queue.
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    /// Format for display in one line.
    pub fn format_compact(&self) -> String {
        let marker = self.priority.marker();
        let title = match &self.title {
            Some(t) => format!("{t}: "),
            None => String::new(),
        };
        if marker.is_empty() {
            format!("{} {}{}", self.kind.icon(), title, self.message)
        } else {
            format!("{} {} {}{}", self.kind.icon(), marker, title, self.message)
        }
    }

    pub(crate) fn apply(&mut self, update: AlertUpdate) {
        if let Some(message) = update.message
            && !message.trim().is_empty()
        {
            self.message = message;
        }
        if let Some(title) = update.title {
            self.title = title;
        }
        if let Some(duration) = update.duration {
            self.duration = duration;
        }
        if let Some(priority) = update.priority {
            self.priority = priority;
        }
        if let Some(dismissible) = update.dismissible {
            self.dismissible = dismissible;
        }
        if let Some(variant) = update.variant {
            self.variant = variant;
        }
        if let Some(group_id) = update.group_id {
            self.group_id = group_id;
        }
        if let Some(position) = update.position {
            self.position = position;
        }
        if let Some(action) = update.action {
            self.action = action;
        }
    }
}

/// Partial update for a live alert. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct AlertUpdate {
    pub message: Option<String>,
    pub title: Option<Option<String>>,
    pub duration: Option<Duration>,
    pub priority: Option<Priority>,
    pub dismissible: Option<bool>,
    pub variant: Option<Variant>,
    pub group_id: Option<Option<String>>,
    pub position: Option<Position>,
    pub action: Option<Option<AlertAction>>,
}

impl AlertUpdate {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(Some(title.into()));
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("error".parse::<AlertKind>(), Ok(AlertKind::Error));
        assert_eq!(" Info ".parse::<AlertKind>(), Ok(AlertKind::Info));
        assert_eq!(
            "fatal".parse::<AlertKind>(),
            Err(AlertError::UnknownKind("fatal".to_string()))
        );
    }

    #[test]
    fn test_priority_orders_critical_first() {
        let mut p = vec![Priority::Low, Priority::Critical, Priority::Medium, Priority::High];
        p.sort();
        assert_eq!(
            p,
            vec![Priority::Critical, Priority::High, Priority::Medium, Priority::Low]
        );
    }

    #[test]
    fn test_content_shapes() {
        let plain: AlertContent = "Saved".into();
        assert_eq!(plain.title, None);

        let titled: AlertContent = ("Profile", "Saved").into();
        assert_eq!(titled.title.as_deref(), Some("Profile"));
        assert_eq!(titled.message, "Saved");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            AlertRequest::parse("nope", "hi"),
            Err(AlertError::UnknownKind(_))
        ));
        assert_eq!(
            AlertRequest::parse("info", "   ").unwrap_err(),
            AlertError::EmptyMessage
        );
        let ok = AlertRequest::parse("warning", "Disk almost full").unwrap();
        assert_eq!(ok.kind, AlertKind::Warning);
    }

    #[test]
    fn test_request_defaults() {
        let r = AlertRequest::new(AlertKind::Success, "Link saved");
        assert!(r.dismissible);
        assert_eq!(r.priority, Priority::Medium);
        assert_eq!(r.variant, Variant::Toast);
        assert_eq!(r.position, Position::TopRight);
        assert!(r.duration.is_none());
    }

    #[test]
    fn test_action_triggers() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let action = AlertAction::new("Undo", move || flag.store(true, Ordering::SeqCst));
        action.trigger();
        assert!(fired.load(Ordering::SeqCst));
    }
}
