//! Shared fakes for the service tests.

use chrono::{DateTime, Utc};
use sluice_lock::{
    AcquireOutcome, InMemoryLockTable, LockError, LockRecord, LockTable, LockToken, Result,
};
use sluice_types::ArtifactPath;

/// Detail carried by every release failure below. Must never reach a caller.
pub(crate) const RELEASE_DETAIL: &str = "EIO unlinking /srv/sluice/locks/3f2a.lock";

/// Lock table that acquires normally but cannot release.
#[derive(Default)]
pub(crate) struct FailingReleaseTable {
    inner: InMemoryLockTable,
}

impl LockTable for FailingReleaseTable {
    fn try_insert(&self, record: &LockRecord, now: DateTime<Utc>) -> Result<AcquireOutcome> {
        self.inner.try_insert(record, now)
    }

    fn remove_if_owner(&self, _path: &ArtifactPath, _owner: &LockToken) -> Result<bool> {
        Err(LockError::Io(std::io::Error::other(RELEASE_DETAIL)))
    }

    fn remove(&self, path: &ArtifactPath) -> Result<bool> {
        self.inner.remove(path)
    }

    fn get(&self, path: &ArtifactPath) -> Result<Option<LockRecord>> {
        self.inner.get(path)
    }

    fn list(&self) -> Result<Vec<LockRecord>> {
        self.inner.list()
    }
}
