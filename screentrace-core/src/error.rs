//! Error types for screentrace-core

use thiserror::Error;

/// Main error type for the screentrace-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Rollup store error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Upload/API error
    #[error("upload error: {0}")]
    Upload(String),

    /// Event queue error
    #[error("queue error: {0}")]
    Queue(String),

    /// Credential error
    #[error("credential error: {0}")]
    Credential(String),
}

/// Result type alias for screentrace-core
pub type Result<T> = std::result::Result<T, Error>;
