//! Error types for the sync engine.

use ctldb_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote store answered with a non-success status.
    #[error("remote store rejected request with status {status}: {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, as returned.
        body: String,
    },

    /// Protocol error (request could not be encoded, response could not be read).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local record store error.
    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    /// I/O error outside the record store (e.g. spawning the sync thread).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid lifecycle transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidState {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// The operation exists but has no agreed behavior yet.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Returns true if the next sync cycle should simply try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Rejected { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection refused").is_retryable());
        assert!(!SyncError::Transport {
            message: "bad url".into(),
            retryable: false
        }
        .is_retryable());
        assert!(SyncError::Rejected {
            status: 500,
            body: String::new()
        }
        .is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::Unsupported("erase_network").is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::Rejected {
            status: 403,
            body: "owner not authorized".into(),
        };
        assert_eq!(
            err.to_string(),
            "remote store rejected request with status 403: owner not authorized"
        );

        let err = SyncError::Unsupported("erase_member");
        assert_eq!(err.to_string(), "operation not supported: erase_member");
    }
}
