use std::collections::BTreeMap;
use std::io::{self, Cursor, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use sluice_types::ArtifactPath;

use crate::error::{StoreError, StoreResult};
use crate::traits::{ObjectStore, ReadHandle, WriteHandle};

type Files = Arc<RwLock<BTreeMap<String, Vec<u8>>>>;

/// Injected failures, shared by the store and every handle it hands out.
struct Faults {
    write_budget: AtomicU64,
    fail_sync: AtomicBool,
    fail_close: AtomicBool,
}

impl Faults {
    fn new() -> Self {
        Self {
            write_budget: AtomicU64::new(u64::MAX),
            fail_sync: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
        }
    }
}

/// In-memory, map-based object store.
///
/// Intended for tests and embedding. Files live behind a `RwLock`; bytes
/// written through a handle are visible to readers immediately, like a
/// distributed filesystem that exposes a file as soon as it is created.
/// Failures can be injected to exercise error paths.
pub struct InMemoryObjectStore {
    files: Files,
    faults: Arc<Faults>,
}

impl InMemoryObjectStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            files: Arc::new(RwLock::new(BTreeMap::new())),
            faults: Arc::new(Faults::new()),
        }
    }

    /// Store `data` at `path`, replacing any existing file.
    pub fn put(&self, path: &ArtifactPath, data: impl Into<Vec<u8>>) -> StoreResult<()> {
        self.files_mut()?.insert(path.as_str().to_string(), data.into());
        Ok(())
    }

    /// Snapshot of the file at `path`.
    pub fn get(&self, path: &ArtifactPath) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.files()?.get(path.as_str()).cloned())
    }

    /// Number of files currently stored.
    pub fn file_count(&self) -> usize {
        self.files().map(|f| f.len()).unwrap_or(0)
    }

    /// Make every write handle fail once it has accepted `bytes` bytes in total.
    pub fn fail_writes_after(&self, bytes: u64) {
        self.faults.write_budget.store(bytes, Ordering::SeqCst);
    }

    /// Make `sync` fail on every handle.
    pub fn fail_sync(&self, fail: bool) {
        self.faults.fail_sync.store(fail, Ordering::SeqCst);
    }

    /// Make `close` fail on every handle.
    pub fn fail_close(&self, fail: bool) {
        self.faults.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Remove all injected failures.
    pub fn clear_faults(&self) {
        self.faults.write_budget.store(u64::MAX, Ordering::SeqCst);
        self.fail_sync(false);
        self.fail_close(false);
    }

    fn files(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.files
            .read()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".into()))
    }

    fn files_mut(
        &self,
    ) -> StoreResult<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.files
            .write()
            .map_err(|_| StoreError::Backend("in-memory store lock poisoned".into()))
    }

    fn dir_prefix(path: &ArtifactPath) -> String {
        format!("{}/", path.as_str())
    }

    fn has_children(map: &BTreeMap<String, Vec<u8>>, path: &ArtifactPath) -> bool {
        let prefix = Self::dir_prefix(path);
        map.range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }

    fn writer(&self, path: &ArtifactPath, truncate: bool) -> StoreResult<Box<dyn WriteHandle>> {
        let mut map = self.files_mut()?;
        if Self::has_children(&map, path) {
            return Err(StoreError::NotAFile(path.clone()));
        }
        let entry = map.entry(path.as_str().to_string()).or_default();
        if truncate {
            entry.clear();
        }
        Ok(Box::new(MemoryWriter {
            files: Arc::clone(&self.files),
            key: path.as_str().to_string(),
            faults: Arc::clone(&self.faults),
        }))
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn exists(&self, path: &ArtifactPath) -> StoreResult<bool> {
        let map = self.files()?;
        Ok(map.contains_key(path.as_str()) || Self::has_children(&map, path))
    }

    fn is_file(&self, path: &ArtifactPath) -> StoreResult<bool> {
        Ok(self.files()?.contains_key(path.as_str()))
    }

    fn is_dir(&self, path: &ArtifactPath) -> StoreResult<bool> {
        let map = self.files()?;
        Ok(Self::has_children(&map, path))
    }

    fn len(&self, path: &ArtifactPath) -> StoreResult<u64> {
        self.files()?
            .get(path.as_str())
            .map(|data| data.len() as u64)
            .ok_or_else(|| StoreError::NotFound(path.clone()))
    }

    fn create(&self, path: &ArtifactPath) -> StoreResult<Box<dyn WriteHandle>> {
        self.writer(path, true)
    }

    fn open_append(&self, path: &ArtifactPath) -> StoreResult<Box<dyn WriteHandle>> {
        self.writer(path, false)
    }

    fn open(&self, path: &ArtifactPath) -> StoreResult<ReadHandle> {
        let map = self.files()?;
        match map.get(path.as_str()) {
            Some(data) => Ok(Box::new(Cursor::new(data.clone()))),
            None if Self::has_children(&map, path) => Err(StoreError::NotAFile(path.clone())),
            None => Err(StoreError::NotFound(path.clone())),
        }
    }

    fn list(&self, path: &ArtifactPath, recursive: bool) -> StoreResult<Vec<ArtifactPath>> {
        let map = self.files()?;
        if !Self::has_children(&map, path) {
            return Err(if map.contains_key(path.as_str()) {
                StoreError::NotADirectory(path.clone())
            } else {
                StoreError::NotFound(path.clone())
            });
        }
        let prefix = Self::dir_prefix(path);
        map.range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| recursive || !k[prefix.len()..].contains('/'))
            .map(|(k, _)| {
                ArtifactPath::parse(k).map_err(|e| StoreError::Backend(e.to_string()))
            })
            .collect()
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("file_count", &self.file_count())
            .finish()
    }
}

/// Handle that appends straight into the shared map.
struct MemoryWriter {
    files: Files,
    key: String,
    faults: Arc<Faults>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let budget = self.faults.write_budget.load(Ordering::SeqCst);
        if budget == 0 {
            return Err(io::Error::other("injected write failure"));
        }
        let n = buf.len().min(usize::try_from(budget).unwrap_or(usize::MAX));
        if budget != u64::MAX {
            self.faults
                .write_budget
                .fetch_sub(n as u64, Ordering::SeqCst);
        }
        let mut map = self
            .files
            .write()
            .map_err(|_| io::Error::other("in-memory store lock poisoned"))?;
        map.entry(self.key.clone())
            .or_default()
            .extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WriteHandle for MemoryWriter {
    fn sync(&mut self) -> io::Result<()> {
        if self.faults.fail_sync.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected sync failure"));
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        if self.faults.fail_close.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected close failure"));
        }
        Ok(())
    }
}
