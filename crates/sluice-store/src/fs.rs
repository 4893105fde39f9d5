use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use sluice_types::ArtifactPath;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::traits::{ObjectStore, ReadHandle, WriteHandle};

/// Object store rooted at a local directory.
///
/// Artifact paths map onto relative filesystem paths below the root. Paths
/// are validated on construction, so they cannot escape it.
#[derive(Debug, Clone)]
pub struct LocalFsStore {
    root: PathBuf,
}

impl LocalFsStore {
    /// Open a store at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &ArtifactPath) -> PathBuf {
        self.root.join(path.as_str())
    }

    fn relative(&self, full: &Path) -> StoreResult<ArtifactPath> {
        let rel = full
            .strip_prefix(&self.root)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let joined = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        ArtifactPath::parse(&joined).map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn writer(&self, path: &ArtifactPath, append: bool) -> StoreResult<Box<dyn WriteHandle>> {
        let full = self.resolve(path);
        if full.is_dir() {
            return Err(StoreError::NotAFile(path.clone()));
        }
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = if append {
            OpenOptions::new().create(true).append(true).open(&full)?
        } else {
            File::create(&full)?
        };
        debug!(path = %path, append, "opened file for writing");
        Ok(Box::new(FsWriter {
            inner: BufWriter::new(file),
        }))
    }
}

fn map_not_found(err: io::Error, path: &ArtifactPath) -> StoreError {
    if err.kind() == ErrorKind::NotFound {
        StoreError::NotFound(path.clone())
    } else {
        StoreError::Io(err)
    }
}

impl ObjectStore for LocalFsStore {
    fn exists(&self, path: &ArtifactPath) -> StoreResult<bool> {
        Ok(self.resolve(path).try_exists()?)
    }

    fn is_file(&self, path: &ArtifactPath) -> StoreResult<bool> {
        Ok(self.resolve(path).is_file())
    }

    fn is_dir(&self, path: &ArtifactPath) -> StoreResult<bool> {
        Ok(self.resolve(path).is_dir())
    }

    fn len(&self, path: &ArtifactPath) -> StoreResult<u64> {
        let meta = fs::metadata(self.resolve(path)).map_err(|e| map_not_found(e, path))?;
        if meta.is_dir() {
            return Err(StoreError::NotAFile(path.clone()));
        }
        Ok(meta.len())
    }

    fn create(&self, path: &ArtifactPath) -> StoreResult<Box<dyn WriteHandle>> {
        self.writer(path, false)
    }

    fn open_append(&self, path: &ArtifactPath) -> StoreResult<Box<dyn WriteHandle>> {
        self.writer(path, true)
    }

    fn open(&self, path: &ArtifactPath) -> StoreResult<ReadHandle> {
        let full = self.resolve(path);
        if full.is_dir() {
            return Err(StoreError::NotAFile(path.clone()));
        }
        let file = File::open(&full).map_err(|e| map_not_found(e, path))?;
        Ok(Box::new(io::BufReader::new(file)))
    }

    fn list(&self, path: &ArtifactPath, recursive: bool) -> StoreResult<Vec<ArtifactPath>> {
        let full = self.resolve(path);
        if !full.exists() {
            return Err(StoreError::NotFound(path.clone()));
        }
        if !full.is_dir() {
            return Err(StoreError::NotADirectory(path.clone()));
        }
        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut files = Vec::new();
        for entry in WalkDir::new(&full).min_depth(1).max_depth(max_depth) {
            let entry = entry.map_err(|e| StoreError::Backend(e.to_string()))?;
            if entry.file_type().is_file() {
                files.push(self.relative(entry.path())?);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Buffered file handle; `sync` flushes and then fsyncs.
struct FsWriter {
    inner: BufWriter<File>,
}

impl Write for FsWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl WriteHandle for FsWriter {
    fn sync(&mut self) -> io::Result<()> {
        self.inner.flush()?;
        self.inner.get_ref().sync_all()
    }

    fn close(mut self: Box<Self>) -> io::Result<()> {
        self.inner.flush()
    }
}
