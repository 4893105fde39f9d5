//! Error types for lock operations.

use thiserror::Error;

/// Errors that can occur while talking to a lock table.
#[derive(Debug, Error)]
pub enum LockError {
    /// The in-process table's mutex was poisoned by a panicking holder.
    #[error("lock table poisoned")]
    Poisoned,

    /// A persisted lock record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from a file-backed lock table.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;
