// src/error.rs
// Standardized error types for devctx

use thiserror::Error;

/// Main error type for the devctx library
#[derive(Error, Debug)]
pub enum DevctxError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using DevctxError
pub type Result<T> = std::result::Result<T, DevctxError>;

impl From<String> for DevctxError {
    fn from(s: String) -> Self {
        DevctxError::Other(s)
    }
}

impl From<tokio::task::JoinError> for DevctxError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            DevctxError::Cancelled
        } else {
            DevctxError::Other(err.to_string())
        }
    }
}

impl From<DevctxError> for String {
    fn from(err: DevctxError) -> Self {
        err.to_string()
    }
}
