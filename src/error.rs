//! Crate-wide error type.
//!
//! Errors are grouped into the five kinds the protocol distinguishes:
//! `Protocol` and `Integrity` are fatal to a connection, the rest are
//! returned as structured per-request or per-transaction results.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CredbError>;

/// Errors produced by the ledger, store, pager, transaction engine and
/// session protocol.
#[derive(Debug, Error)]
pub enum CredbError {
    /// Framing or handshake violation. Fatal to the connection.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authenticated-encryption or signature failure. Fatal to the connection.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Malformed key, predicate, or argument shape.
    #[error("validation error: {0}")]
    Validation(String),

    /// Isolation-level violation surfaced on a transaction commit.
    #[error("{0}")]
    Conflict(String),

    /// Requested key, event, or page does not exist.
    #[error("not found")]
    NotFound,

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CredbError {
    /// Whether this error should close the owning connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CredbError::Protocol(_) | CredbError::Integrity(_))
    }

    /// Shorthand for a validation error with a formatted message.
    pub fn validation(msg: impl Into<String>) -> Self {
        CredbError::Validation(msg.into())
    }

    /// Shorthand for a conflict error with a formatted message.
    pub fn conflict(msg: impl Into<String>) -> Self {
        CredbError::Conflict(msg.into())
    }

    /// Shorthand for a protocol error with a formatted message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        CredbError::Protocol(msg.into())
    }

    /// Shorthand for an integrity error with a formatted message.
    pub fn integrity(msg: impl Into<String>) -> Self {
        CredbError::Integrity(msg.into())
    }
}
