//! Error types for Payrun

use thiserror::Error;

/// Result type alias for Payrun operations
pub type Result<T> = std::result::Result<T, PayrunError>;

/// Main error type for Payrun
#[derive(Error, Debug)]
pub enum PayrunError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
