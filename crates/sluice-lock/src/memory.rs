//! In-memory lock table for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use sluice_types::ArtifactPath;

use crate::error::{LockError, Result};
use crate::traits::{AcquireOutcome, LockRecord, LockTable, LockToken};

/// A [`LockTable`] kept in a `HashMap` behind a `RwLock`.
///
/// All locks are lost when the table is dropped, which doubles as the
/// "restart clears stuck locks" behavior of a process-local deployment.
#[derive(Debug, Default)]
pub struct InMemoryLockTable {
    locks: RwLock<HashMap<ArtifactPath, LockRecord>>,
}

impl InMemoryLockTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockTable for InMemoryLockTable {
    fn try_insert(&self, record: &LockRecord, now: DateTime<Utc>) -> Result<AcquireOutcome> {
        let mut locks = self.locks.write().map_err(|_| LockError::Poisoned)?;
        let displaced = match locks.get(&record.path) {
            Some(existing) if !existing.is_expired(now) => return Ok(AcquireOutcome::Held),
            Some(existing) => Some(existing.clone()),
            None => None,
        };
        locks.insert(record.path.clone(), record.clone());
        Ok(AcquireOutcome::Acquired { displaced })
    }

    fn remove_if_owner(&self, path: &ArtifactPath, owner: &LockToken) -> Result<bool> {
        let mut locks = self.locks.write().map_err(|_| LockError::Poisoned)?;
        match locks.get(path) {
            Some(existing) if existing.owner == *owner => {
                locks.remove(path);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn remove(&self, path: &ArtifactPath) -> Result<bool> {
        let mut locks = self.locks.write().map_err(|_| LockError::Poisoned)?;
        Ok(locks.remove(path).is_some())
    }

    fn get(&self, path: &ArtifactPath) -> Result<Option<LockRecord>> {
        let locks = self.locks.read().map_err(|_| LockError::Poisoned)?;
        Ok(locks.get(path).cloned())
    }

    fn list(&self) -> Result<Vec<LockRecord>> {
        let locks = self.locks.read().map_err(|_| LockError::Poisoned)?;
        let mut records: Vec<LockRecord> = locks.values().cloned().collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(records)
    }
}
