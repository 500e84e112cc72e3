//! Telemetry: structured logging for the replication engine.
//!
//! # Example
//!
//! ```rust,no_run
//! use replog_core::telemetry::{init_logging, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default()).expect("Failed to initialize logging");
//! ```

pub mod logging;

pub use logging::{init_logging, redact_url, LogFormat, LoggingConfig};
