//! # beacon-core
//!
//! Core types, errors, and utilities for Beacon.
//!
//! This crate provides:
//! - [`BeaconError`] - Error type for configuration, I/O and internal faults
//! - [`logging`] - Tracing setup and log management utilities
//! - [`config`] - YAML configuration with defaults for every section
//! - [`classify`] - Error classification into a closed set of kinds
//!
//! ## Example
//!
//! ```no_run
//! use beacon_core::{BeaconConfig, logging};
//!
//! fn main() -> beacon_core::Result<()> {
//!     let _guard = logging::init_logging(None, false)?;
//!     let config = BeaconConfig::load_or_default(&beacon_core::config::default_config_path()?)?;
//!     tracing::info!(capacity = config.alerts.capacity, "config loaded");
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod config;
pub mod error;
pub mod logging;

// Re-export main types for convenience
pub use classify::{
    classify, classify_with, Classification, Classify, ClassifyContext, ErrorKind, Thrown,
};
pub use config::{AlertConfig, BeaconConfig, ReportingConfig, RetryConfig};
pub use error::{BeaconError, Result};
pub use logging::{init_logging, LogGuard};
