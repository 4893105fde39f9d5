use sluice_types::ArtifactPath;

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Nothing exists at the path.
    #[error("not found: {0}")]
    NotFound(ArtifactPath),

    /// The path exists but is a directory.
    #[error("not a file: {0}")]
    NotAFile(ArtifactPath),

    /// The path exists but is a file.
    #[error("not a directory: {0}")]
    NotADirectory(ArtifactPath),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure that is not an I/O error.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
