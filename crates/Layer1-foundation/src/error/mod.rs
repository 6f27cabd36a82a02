//! Error types for wpok
//!
//! Every layer reports failures through this one enum. Wait/watch outcomes
//! such as timeouts are values, not errors, and never appear here.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// wpok error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Storage
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // Task service (broker / store)
    // ========================================================================
    #[error("Task service error: {0}")]
    Service(String),

    #[error("Task service disconnected: {0}")]
    Disconnected(String),

    // ========================================================================
    // General
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // ========================================================================
    // Conversions from external errors
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // ========================================================================
    // Other
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error comes from the broker/store side rather than the caller
    pub fn is_service_failure(&self) -> bool {
        matches!(
            self,
            Error::Service(_) | Error::Disconnected(_) | Error::Storage(_) | Error::Sqlite(_)
        )
    }

    /// Whether the error is caused by user input and can be shown as-is
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::InvalidInput(_) | Error::Validation(_) | Error::Config(_)
        )
    }

    /// Service error helper
    pub fn service(message: impl Into<String>) -> Self {
        Error::Service(message.into())
    }

    /// Disconnect helper
    pub fn disconnected(message: impl Into<String>) -> Self {
        Error::Disconnected(message.into())
    }
}

// ============================================================================
// Additional conversions
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
