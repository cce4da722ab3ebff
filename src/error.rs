use thiserror::Error;

/// Result type for pgfifo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error type returned by subscription callbacks.
///
/// Any error returned from a callback causes the batch it was handed to be
/// rolled back and redelivered on a later lease cycle.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Error types for pgfifo operations.
///
/// Configuration and schema-bootstrap errors are reported synchronously at
/// construction. Publish errors are reported synchronously to the caller.
/// Errors inside a running subscription worker are never surfaced through
/// this type; the worker rolls back, logs, and retries.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (SQLx errors)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Required configuration field is missing
    #[error("Missing required configuration: {field}")]
    MissingConfig { field: String },

    /// Configuration field has an invalid value or an unknown option was given
    #[error("Invalid configuration value for {field}: {message}")]
    InvalidConfig { field: String, message: String },
}
