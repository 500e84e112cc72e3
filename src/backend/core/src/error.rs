//! Error handling for the replication log and snapshot engine.
//!
//! This module provides:
//! - A single error type carrying a stable, machine-readable [`ErrorCode`]
//! - Status mapping for whatever RPC/HTTP layer sits on top of the engine
//! - User-friendly messages vs detailed internal messages
//! - Severity-driven logging with tracing integration
//!
//! # Usage
//!
//! ```rust,ignore
//! use replog_core::error::{ReplogError, Result};
//!
//! fn resume(namespace: &str, bucket: &str) -> Result<()> {
//!     Err(ReplogError::incremental_log_not_available(namespace, bucket))
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for replication log operations.
pub type Result<T> = std::result::Result<T, ReplogError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by replication consumers for
/// programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Replication Log Errors (1000-1099)
    NamespaceNotFound,
    IncrementalLogNotAvailable,
    Cancelled,

    // Snapshot Errors (1100-1199)
    InvalidSnapshot,
    SnapshotCursorMissing,
    MissingReferences,

    // Storage Errors (2000-2099)
    StorageError,
    StorageConnectionFailed,
    BlobNotFound,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,

    // Validation Errors (4100-4199)
    InvalidInput,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::NamespaceNotFound => 1000,
            Self::IncrementalLogNotAvailable => 1001,
            Self::Cancelled => 1002,

            Self::InvalidSnapshot => 1100,
            Self::SnapshotCursorMissing => 1101,
            Self::MissingReferences => 1102,

            Self::StorageError => 2000,
            Self::StorageConnectionFailed => 2001,
            Self::BlobNotFound => 2002,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::InvalidInput => 4100,

            Self::ConfigurationError => 5000,
            Self::InvalidConfiguration => 5001,

            Self::InternalError => 9000,
        }
    }

    /// Get the HTTP-equivalent status code for this error.
    ///
    /// The transport layer is not part of this crate, so the status is a
    /// plain number for the boundary to translate.
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::NamespaceNotFound | Self::BlobNotFound => 404,

            // The resume point is gone for good; callers must fall back to a snapshot.
            Self::IncrementalLogNotAvailable => 410,

            Self::Cancelled => 499,

            Self::InvalidInput => 422,

            Self::StorageConnectionFailed => 503,

            Self::InvalidSnapshot
            | Self::SnapshotCursorMissing
            | Self::MissingReferences
            | Self::StorageError
            | Self::SerializationError
            | Self::DeserializationError
            | Self::ConfigurationError
            | Self::InvalidConfiguration
            | Self::InternalError => 500,
        }
    }

    /// Check if this error is retryable.
    ///
    /// `IncrementalLogNotAvailable` is deliberately not retryable: replaying
    /// the same cursor against the log can never succeed again.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageConnectionFailed | Self::StorageError | Self::MissingReferences
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "replication_log",
            1100..=1199 => "snapshot",
            2000..=2099 => "storage",
            2200..=2299 => "serialization",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected conditions (unknown namespace, cooperative cancellation)
    Low,
    /// Operational issues the next cycle usually resolves
    Medium,
    /// System errors (storage failures, corrupt snapshots)
    High,
    /// Critical errors requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::NamespaceNotFound
            | ErrorCode::Cancelled
            | ErrorCode::InvalidInput
            | ErrorCode::BlobNotFound => Self::Low,

            ErrorCode::IncrementalLogNotAvailable
            | ErrorCode::SnapshotCursorMissing
            | ErrorCode::MissingReferences => Self::Medium,

            ErrorCode::InvalidSnapshot
            | ErrorCode::StorageError
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::StorageConnectionFailed | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (namespace, blob, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for the replication engine.
#[derive(Error, Debug)]
pub struct ReplogError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to consumers)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for ReplogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl ReplogError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        }
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// No replication log has ever been written for `namespace`.
    pub fn namespace_not_found(namespace: impl fmt::Display) -> Self {
        let namespace = namespace.to_string();
        Self::new(
            ErrorCode::NamespaceNotFound,
            format!("No replication log found for namespace {}", namespace),
        )
        .with_details(ErrorDetails::new().with_entity("namespace", namespace))
    }

    /// The resume bucket is no longer retained by the log.
    pub fn incremental_log_not_available(namespace: impl fmt::Display, bucket: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::IncrementalLogNotAvailable,
            format!(
                "Bucket {} is no longer part of the replication log for namespace {}",
                bucket, namespace
            ),
        )
        .with_context("namespace", namespace.to_string())
        .with_context("bucket", bucket.to_string())
        .with_suggestion("Resume from the latest snapshot of the namespace")
    }

    /// Cooperative cancellation.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::Cancelled, "Operation was cancelled", operation)
    }

    /// A corrupt or unreadable snapshot.
    pub fn invalid_snapshot(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InvalidSnapshot, "Snapshot could not be read", message)
    }

    /// A blob that was expected to exist is missing.
    pub fn blob_not_found(namespace: impl fmt::Display, blob: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::BlobNotFound,
            format!("Blob {} not found in namespace {}", blob, namespace),
        )
        .with_details(ErrorDetails::new().with_entity("blob", blob.to_string()))
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.details.suggested_action = Some(suggestion.into());
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-friendly message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the HTTP-equivalent status code.
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::Cancelled
    }

    pub fn is_log_not_available(&self) -> bool {
        self.code == ErrorCode::IncrementalLogNotAvailable
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<redis::RedisError> for ReplogError {
    fn from(error: redis::RedisError) -> Self {
        let (code, user_msg) = if error.is_connection_refusal() || error.is_connection_dropped() {
            (ErrorCode::StorageConnectionFailed, "Unable to connect to the log store")
        } else if error.is_timeout() {
            (ErrorCode::StorageError, "Log store operation timed out")
        } else {
            (ErrorCode::StorageError, "A log store error occurred")
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for ReplogError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string()).with_source(error)
    }
}

impl From<std::io::Error> for ReplogError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, user_msg) = match error.kind() {
            ErrorKind::UnexpectedEof | ErrorKind::InvalidData => {
                (ErrorCode::InvalidSnapshot, "Snapshot data is truncated or corrupt")
            }
            ErrorKind::TimedOut => (ErrorCode::StorageError, "Operation timed out"),
            _ => (ErrorCode::StorageError, "An I/O error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<tokio::task::JoinError> for ReplogError {
    fn from(error: tokio::task::JoinError) -> Self {
        if error.is_cancelled() {
            return Self::cancelled("background task cancelled");
        }
        Self::with_internal(ErrorCode::InternalError, "A background task failed", error.to_string())
            .with_source(error)
    }
}

impl From<uuid::Error> for ReplogError {
    fn from(error: uuid::Error) -> Self {
        Self::with_internal(ErrorCode::InvalidInput, "Invalid event identifier", error.to_string())
            .with_source(error)
    }
}

impl From<config::ConfigError> for ReplogError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => {
                (ErrorCode::InvalidConfiguration, "Configuration file is invalid")
            }
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::NamespaceNotFound.http_status(), 404);
        assert_eq!(ErrorCode::IncrementalLogNotAvailable.http_status(), 410);
        assert_eq!(ErrorCode::InvalidInput.http_status(), 422);
        assert_eq!(ErrorCode::InternalError.http_status(), 500);
    }

    #[test]
    fn test_error_code_is_retryable() {
        assert!(ErrorCode::StorageConnectionFailed.is_retryable());
        assert!(!ErrorCode::IncrementalLogNotAvailable.is_retryable());
        assert!(!ErrorCode::NamespaceNotFound.is_retryable());
        assert!(!ErrorCode::Cancelled.is_retryable());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(ErrorCode::IncrementalLogNotAvailable.category(), "replication_log");
        assert_eq!(ErrorCode::MissingReferences.category(), "snapshot");
        assert_eq!(ErrorCode::BlobNotFound.category(), "storage");
    }

    #[test]
    fn test_log_not_available_carries_context() {
        let error = ReplogError::incremental_log_not_available("ns", "rep-1");
        assert!(error.is_log_not_available());
        assert!(error.details().context.contains_key("namespace"));
        assert!(error.details().context.contains_key("bucket"));
        assert!(error.details().suggested_action.is_some());
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::Cancelled), ErrorSeverity::Low);
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::IncrementalLogNotAvailable),
            ErrorSeverity::Medium
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::StorageConnectionFailed),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_io_eof_maps_to_invalid_snapshot() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read");
        let error = ReplogError::from(io);
        assert_eq!(error.code(), ErrorCode::InvalidSnapshot);
    }

    #[test]
    fn test_error_display() {
        let error = ReplogError::with_internal(
            ErrorCode::StorageError,
            "Log store unavailable",
            "Connection refused: localhost:6379",
        );

        let display = format!("{}", error);
        assert!(display.contains("StorageError"));
        assert!(display.contains("Log store unavailable"));
        assert!(display.contains("Connection refused"));
    }
}
