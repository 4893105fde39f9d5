use std::io::{self, Read, Write};

use sluice_types::ArtifactPath;

use crate::error::StoreResult;

/// Streaming write handle returned by [`ObjectStore::create`] and
/// [`ObjectStore::open_append`].
///
/// `flush` pushes buffered bytes to the backend; [`sync`](Self::sync) asks the
/// backend to make them durable. Bytes become visible to readers as the
/// backend accepts them, not at close.
pub trait WriteHandle: Write + Send {
    /// Make everything written so far durable.
    fn sync(&mut self) -> io::Result<()>;

    /// Flush and release the handle. A failure here means the tail of the
    /// write may not have reached the backend.
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// Streaming read handle.
pub type ReadHandle = Box<dyn Read + Send>;

/// Byte-oriented storage backend addressed by [`ArtifactPath`].
///
/// All implementations must satisfy these invariants:
/// - Directories are implicit; a path is a directory when some file lives
///   beneath it.
/// - `create` truncates; `open_append` creates when absent.
/// - The store never interprets file contents.
/// - All I/O errors are propagated, never silently ignored.
pub trait ObjectStore: Send + Sync {
    /// Whether anything (file or directory) exists at `path`.
    fn exists(&self, path: &ArtifactPath) -> StoreResult<bool>;

    fn is_file(&self, path: &ArtifactPath) -> StoreResult<bool>;

    fn is_dir(&self, path: &ArtifactPath) -> StoreResult<bool>;

    /// Size in bytes of the file at `path`.
    fn len(&self, path: &ArtifactPath) -> StoreResult<u64>;

    /// Create (or truncate) the file at `path` for writing.
    fn create(&self, path: &ArtifactPath) -> StoreResult<Box<dyn WriteHandle>>;

    /// Open the file at `path` for appending, creating it if absent.
    fn open_append(&self, path: &ArtifactPath) -> StoreResult<Box<dyn WriteHandle>>;

    /// Open the file at `path` for reading.
    fn open(&self, path: &ArtifactPath) -> StoreResult<ReadHandle>;

    /// Files under the directory `path`, sorted. With `recursive`, files in
    /// nested directories are included.
    fn list(&self, path: &ArtifactPath, recursive: bool) -> StoreResult<Vec<ArtifactPath>>;
}
