//! Error types for record store operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or writing records.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be encoded or decoded as JSON.
    #[error("invalid record JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Another process holds the store directory.
    #[error("record store at {0:?} is locked by another process")]
    Locked(PathBuf),

    /// The document's `objtype` is neither `network` nor `member`.
    #[error("unknown object type: {0:?}")]
    UnknownObjectType(String),
}
