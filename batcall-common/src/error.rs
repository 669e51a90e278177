//! Shared error type for the batcall crates

use thiserror::Error;

/// Result alias used by store and config code
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the store, configuration loading and row decoding
#[derive(Error, Debug)]
pub enum Error {
    /// sqlx failure (connection, query, transaction commit)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON column could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file unreadable or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Row lookup by id or name found nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Stored value outside its domain (unknown status string, bad interval)
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Operation not allowed in the current run state
    #[error("Conflict: {0}")]
    Conflict(String),
}
