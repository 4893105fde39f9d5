use std::io;

/// Errors from the checksum pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    /// The digest was requested before the stream reached its end.
    #[error("digest requested before end of stream ({consumed} bytes consumed)")]
    NotFinished { consumed: u64 },

    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    /// I/O error from the wrapped stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result alias for checksum operations.
pub type ChecksumResult<T> = Result<T, ChecksumError>;
