//! Error classification.
//!
//! Any failure value, whether a typed error, a bare string or a JSON payload
//! handed back by the backend, is reduced to a closed [`ErrorKind`] tag and a
//! message that is safe to show an end user. Downstream code switches on the
//! tag instead of re-sniffing the value's shape.
//!
//! ## Example
//!
//! ```
//! use beacon_core::classify::{classify, ErrorKind, GENERIC_MESSAGE};
//!
//! let c = classify("connect ECONNREFUSED 127.0.0.1:5432");
//! assert_eq!(c.kind, ErrorKind::Network);
//!
//! let c = classify(&serde_json::json!(42));
//! assert_eq!(c.kind, ErrorKind::General);
//! assert_eq!(c.user_message, GENERIC_MESSAGE);
//! ```

use std::error::Error as StdError;
use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BeaconError;

/// Fallback shown when a failure carries no usable message.
pub const GENERIC_MESSAGE: &str = "An unexpected error occurred";

/// Message shown for network-classified failures.
pub const NETWORK_MESSAGE: &str =
    "Network connection issue. Check your internet connection and try again.";

/// Message signatures that mark a failure as network-related.
const NETWORK_SIGNATURES: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection closed",
    "econnrefused",
    "econnreset",
    "etimedout",
    "enotfound",
    "eai_again",
    "enetunreach",
    "failed to fetch",
    "network error",
    "networkerror",
    "network request failed",
    "network is unreachable",
    "no route to host",
    "socket hang up",
    "dns error",
    "timed out",
];

/// Error codes carried in a JSON `code` field that mark a network failure.
const NETWORK_CODES: &[&str] = &[
    "ECONNREFUSED",
    "ECONNRESET",
    "ETIMEDOUT",
    "ENOTFOUND",
    "EAI_AGAIN",
    "ENETUNREACH",
    "NETWORK_ERROR",
];

/// Closed classification tag for failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Anything not recognised as one of the other kinds
    General,
    /// Connectivity failure talking to the backend
    Network,
    /// Input rejected; only assigned from caller context
    Validation,
    /// A view or component failed; only assigned from caller context
    Component,
    /// A retry sequence was cancelled
    Aborted,
    /// An attempt exceeded its deadline
    Timeout,
}

impl ErrorKind {
    /// The kinds every statistics table starts with.
    pub const BASE: [ErrorKind; 4] = [
        ErrorKind::General,
        ErrorKind::Network,
        ErrorKind::Validation,
        ErrorKind::Component,
    ];

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::General => "general",
            ErrorKind::Network => "network",
            ErrorKind::Validation => "validation",
            ErrorKind::Component => "component",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Closed tag
    pub kind: ErrorKind,
    /// Sanitised, end-user-safe message
    pub user_message: String,
}

/// Caller-supplied hints. Shape alone never makes a failure a validation or
/// component error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifyContext {
    /// The failure came from validating user input
    pub validation: bool,
    /// The failure came from a view/component
    pub component: bool,
    /// The caller already knows this was a network call failing
    pub network: bool,
}

impl ClassifyContext {
    pub fn validation() -> Self {
        Self {
            validation: true,
            ..Self::default()
        }
    }

    pub fn component() -> Self {
        Self {
            component: true,
            ..Self::default()
        }
    }

    pub fn network() -> Self {
        Self {
            network: true,
            ..Self::default()
        }
    }
}

/// The shape of a failure value as seen by the classifier.
#[derive(Debug, Clone, Copy)]
pub enum Thrown<'a> {
    /// A typed error with an optional source chain
    Error(&'a (dyn StdError + 'static)),
    /// A bare message
    Text(&'a str),
    /// An arbitrary JSON payload (object with `message`, number, array, ...)
    Value(&'a Value),
    /// A failure that already knows its kind (retry engine pseudo-kinds)
    Tagged { kind: ErrorKind, message: &'a str },
    /// Nothing inspectable
    Opaque,
}

/// Values that can be classified.
pub trait Classify {
    /// View this value through the classifier's closed set of shapes.
    fn thrown(&self) -> Thrown<'_>;

    /// Human-readable message, if the value carries one.
    fn message(&self) -> Option<String> {
        extract_message(&self.thrown())
    }
}

impl Classify for str {
    fn thrown(&self) -> Thrown<'_> {
        Thrown::Text(self)
    }
}

impl Classify for String {
    fn thrown(&self) -> Thrown<'_> {
        Thrown::Text(self)
    }
}

impl Classify for Value {
    fn thrown(&self) -> Thrown<'_> {
        Thrown::Value(self)
    }
}

impl Classify for io::Error {
    fn thrown(&self) -> Thrown<'_> {
        Thrown::Error(self)
    }
}

impl Classify for anyhow::Error {
    fn thrown(&self) -> Thrown<'_> {
        let inner: &(dyn StdError + Send + Sync + 'static) = self.as_ref();
        Thrown::Error(inner)
    }
}

impl Classify for Box<dyn StdError + Send + Sync> {
    fn thrown(&self) -> Thrown<'_> {
        let inner: &(dyn StdError + Send + Sync + 'static) = self.as_ref();
        Thrown::Error(inner)
    }
}

impl Classify for BeaconError {
    fn thrown(&self) -> Thrown<'_> {
        Thrown::Error(self)
    }
}

impl Classify for Thrown<'_> {
    fn thrown(&self) -> Thrown<'_> {
        *self
    }
}

impl<T: Classify + ?Sized> Classify for &T {
    fn thrown(&self) -> Thrown<'_> {
        (**self).thrown()
    }
}

impl<T: Classify + ?Sized> Classify for std::sync::Arc<T> {
    fn thrown(&self) -> Thrown<'_> {
        (**self).thrown()
    }
}

/// Classify a failure with no caller context.
pub fn classify<T: Classify + ?Sized>(value: &T) -> Classification {
    classify_with(value, ClassifyContext::default())
}

/// Classify a failure, letting the caller mark it as a validation or
/// component error.
pub fn classify_with<T: Classify + ?Sized>(value: &T, context: ClassifyContext) -> Classification {
    let thrown = value.thrown();
    let message = extract_message(&thrown);

    let kind = match thrown {
        Thrown::Tagged { kind, .. } => kind,
        _ if context.validation => ErrorKind::Validation,
        _ if context.component => ErrorKind::Component,
        _ if context.network || is_network(&thrown, message.as_deref()) => ErrorKind::Network,
        _ => ErrorKind::General,
    };

    let user_message = match kind {
        ErrorKind::Network => NETWORK_MESSAGE.to_string(),
        _ => message
            .as_deref()
            .and_then(sanitize)
            .unwrap_or_else(|| GENERIC_MESSAGE.to_string()),
    };

    Classification { kind, user_message }
}

/// Pull a message out of a failure value, if it has one.
pub fn extract_message(thrown: &Thrown<'_>) -> Option<String> {
    match thrown {
        Thrown::Error(e) => Some(e.to_string()),
        Thrown::Text(s) => Some((*s).to_string()),
        Thrown::Value(Value::String(s)) => Some(s.clone()),
        Thrown::Value(Value::Object(map)) => match map.get("message") {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        },
        Thrown::Value(_) => None,
        Thrown::Tagged { message, .. } => Some((*message).to_string()),
        Thrown::Opaque => None,
    }
}

/// First non-empty line, trimmed. Everything after it (stack frames, debug
/// dumps) is dropped.
fn sanitize(message: &str) -> Option<String> {
    let line = message.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line.strip_prefix("Error: ").unwrap_or(line).trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

fn is_network(thrown: &Thrown<'_>, message: Option<&str>) -> bool {
    match thrown {
        Thrown::Error(e) => {
            let mut current: Option<&(dyn StdError + 'static)> = Some(*e);
            while let Some(err) = current {
                if let Some(io_err) = err.downcast_ref::<io::Error>()
                    && is_network_io_kind(io_err.kind())
                {
                    return true;
                }
                if has_network_signature(&err.to_string()) {
                    return true;
                }
                current = err.source();
            }
            false
        }
        Thrown::Value(Value::Object(map)) => {
            let code_matches = map
                .get("code")
                .and_then(Value::as_str)
                .is_some_and(|code| NETWORK_CODES.contains(&code.to_ascii_uppercase().as_str()));
            let name_matches = map
                .get("name")
                .and_then(Value::as_str)
                .is_some_and(|name| name.eq_ignore_ascii_case("NetworkError"));
            code_matches || name_matches || message.is_some_and(has_network_signature)
        }
        Thrown::Text(_) | Thrown::Value(_) => message.is_some_and(has_network_signature),
        Thrown::Tagged { .. } | Thrown::Opaque => false,
    }
}

fn is_network_io_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
    )
}

fn has_network_signature(message: &str) -> bool {
    let lower = message.to_lowercase();
    NETWORK_SIGNATURES.iter().any(|sig| lower.contains(sig))
}
