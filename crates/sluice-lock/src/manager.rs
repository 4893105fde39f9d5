use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sluice_types::ArtifactPath;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::traits::{AcquireOutcome, LockRecord, LockTable, LockToken};

/// Non-blocking mutual exclusion keyed by physical artifact path.
///
/// Acquisition never waits: a held path yields `Ok(None)` and the caller
/// reports "busy". A successful acquisition returns a [`LockGuard`] that
/// releases on drop, so every exit path of an upload frees the lock.
#[derive(Clone)]
pub struct LockManager {
    table: Arc<dyn LockTable>,
    lease_ttl: Option<Duration>,
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("lease_ttl", &self.lease_ttl)
            .finish_non_exhaustive()
    }
}

impl LockManager {
    /// A manager whose locks never expire.
    pub fn new(table: Arc<dyn LockTable>) -> Self {
        Self {
            table,
            lease_ttl: None,
        }
    }

    /// Locks older than `ttl` may be taken over by the next acquirer.
    pub fn with_lease(mut self, ttl: Option<Duration>) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn lease_ttl(&self) -> Option<Duration> {
        self.lease_ttl
    }

    /// Try to take the lock on `path` without waiting.
    pub fn try_acquire(&self, path: &ArtifactPath) -> Result<Option<LockGuard>> {
        let now = Utc::now();
        let expires_at = self.lease_ttl.map(|ttl| {
            let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
            now.checked_add_signed(ttl)
                .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC)
        });
        let record = LockRecord {
            path: path.clone(),
            owner: LockToken::generate(),
            acquired_at: now,
            expires_at,
        };

        match self.table.try_insert(&record, now)? {
            AcquireOutcome::Held => {
                debug!(path = %path, "lock busy");
                Ok(None)
            }
            AcquireOutcome::Acquired { displaced } => {
                if let Some(stale) = displaced {
                    warn!(
                        path = %path,
                        stale_owner = %stale.owner,
                        acquired_at = %stale.acquired_at,
                        "took over expired lock"
                    );
                }
                debug!(path = %path, owner = %record.owner, "lock acquired");
                Ok(Some(LockGuard {
                    table: Arc::clone(&self.table),
                    path: path.clone(),
                    token: record.owner,
                    released: false,
                }))
            }
        }
    }

    /// Release `path` if `token` still owns it. A stale token is a no-op.
    pub fn release(&self, path: &ArtifactPath, token: &LockToken) -> Result<bool> {
        let removed = self.table.remove_if_owner(path, token)?;
        if !removed {
            debug!(path = %path, owner = %token, "release skipped: not the holder");
        }
        Ok(removed)
    }

    /// Operator escape hatch: drop whatever lock is held on `path`.
    pub fn force_release(&self, path: &ArtifactPath) -> Result<bool> {
        let removed = self.table.remove(path)?;
        if removed {
            info!(path = %path, "lock force-released");
        }
        Ok(removed)
    }

    /// Whether `path` is held by an unexpired lock.
    pub fn is_held(&self, path: &ArtifactPath) -> Result<bool> {
        Ok(self.holder(path)?.is_some())
    }

    /// The unexpired lock on `path`, if any.
    pub fn holder(&self, path: &ArtifactPath) -> Result<Option<LockRecord>> {
        let now = Utc::now();
        Ok(self.table.get(path)?.filter(|r| !r.is_expired(now)))
    }

    /// All records in the table, including expired ones awaiting takeover.
    pub fn held(&self) -> Result<Vec<LockRecord>> {
        self.table.list()
    }
}

/// Scoped ownership of one path lock.
///
/// Dropping the guard releases the lock. Use [`LockGuard::release`] to see
/// release errors instead of having them logged.
#[must_use = "dropping the guard releases the lock immediately"]
pub struct LockGuard {
    table: Arc<dyn LockTable>,
    path: ArtifactPath,
    token: LockToken,
    released: bool,
}

impl LockGuard {
    pub fn path(&self) -> &ArtifactPath {
        &self.path
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Release now and report the outcome.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        if !self.table.remove_if_owner(&self.path, &self.token)? {
            warn!(path = %self.path, owner = %self.token, "lock was no longer ours at release");
        }
        Ok(())
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("path", &self.path)
            .field("token", &self.token)
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.table.remove_if_owner(&self.path, &self.token) {
            Ok(true) => debug!(path = %self.path, "lock released"),
            Ok(false) => {
                warn!(path = %self.path, owner = %self.token, "lock was no longer ours at release")
            }
            Err(e) => error!(path = %self.path, error = %e, "failed to release lock"),
        }
    }
}
