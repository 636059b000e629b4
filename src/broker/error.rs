// ABOUTME: Error taxonomy for broker operations
//
// Each variant maps to a `FailureKind` that travels on the wire inside a
// `failed` reply, so the client sees an explicit reason instead of a dropped
// connection.

use std::time::Duration;

use thiserror::Error;

use super::codec::{CodecError, FailureKind};
use super::registry::HandleId;

/// Errors produced by the registry, executors, retry manager and dispatcher
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Timeout or socket-level failure while opening a session
    #[error("Connect to {target} failed: {reason}")]
    Connect { target: String, reason: String },

    /// A bounded wait expired during a read
    #[error("Read from {target} timed out after {elapsed:?}")]
    ReadTimeout { target: String, elapsed: Duration },

    /// HTTP response other than 200
    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    /// Unknown handle id referenced by a command
    #[error("Handle not found: {0}")]
    HandleNotFound(HandleId),

    /// Per-URL failure counter reached the configured maximum
    #[error("Retries exhausted for {url} after {attempts} attempts")]
    RetryExhausted { url: String, attempts: u32 },

    /// Generated id already present in the registry
    #[error("Duplicate handle id: {0}")]
    DuplicateHandle(HandleId),

    /// Operation not available for this protocol
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// `chain` option names no registered chain
    #[error("Unknown chain: {0}")]
    UnknownChain(String),

    /// Malformed request or reply frame
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Operation on a handle whose session was already closed
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// Socket I/O error on an open session
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    /// Whether the Retry Manager may try the same handle again
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::ReadTimeout { .. } | Self::HttpStatus { .. } | Self::Io(_)
        )
    }

    /// Wire classification of this error
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Connect { .. } => FailureKind::Connect,
            Self::ReadTimeout { .. } => FailureKind::ReadTimeout,
            Self::HttpStatus { .. } => FailureKind::HttpStatus,
            Self::HandleNotFound(_) => FailureKind::NotFound,
            Self::RetryExhausted { .. } => FailureKind::RetryExhausted,
            Self::Unsupported(_) | Self::UnknownChain(_) => FailureKind::Unsupported,
            Self::Codec(_) => FailureKind::Codec,
            Self::DuplicateHandle(_) | Self::SessionClosed(_) | Self::Io(_) => {
                FailureKind::Internal
            }
        }
    }

    pub(crate) fn connect(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connect {
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;
