//! The [`LockTable`] trait defining lock persistence.
//!
//! A lock table is the durable side of the mutex: it records which physical
//! paths are held and by whom. [`LockManager`](crate::LockManager) layers
//! token generation, lease policy and scoped release on top.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sluice_types::ArtifactPath;
use uuid::Uuid;

use crate::error::Result;

/// Opaque owner token stamped on every acquisition.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(Uuid);

impl LockToken {
    /// A fresh, time-ordered token.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockToken({})", self.0)
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One held lock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub path: ArtifactPath,
    pub owner: LockToken,
    pub acquired_at: DateTime<Utc>,
    /// `None` means the lock never expires on its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl LockRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Result of a single acquisition attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The slot is now ours. `displaced` carries an expired record that was
    /// taken over, if any.
    Acquired { displaced: Option<LockRecord> },
    /// Someone else holds an unexpired lock.
    Held,
}

/// Persistent storage for per-path locks.
///
/// Implementations must be thread-safe (`Send + Sync`) and make
/// [`try_insert`](Self::try_insert) atomic with respect to other callers of
/// the same table, including callers in other processes for shared backends.
pub trait LockTable: Send + Sync {
    /// Insert `record` if its path is free or held by a lock that has expired
    /// at `now`. Never waits.
    fn try_insert(&self, record: &LockRecord, now: DateTime<Utc>) -> Result<AcquireOutcome>;

    /// Remove the lock on `path` only if `owner` still holds it.
    ///
    /// Returns `Ok(false)` when the path is free or held by someone else.
    fn remove_if_owner(&self, path: &ArtifactPath, owner: &LockToken) -> Result<bool>;

    /// Remove the lock on `path` whoever holds it. Returns whether a lock existed.
    fn remove(&self, path: &ArtifactPath) -> Result<bool>;

    /// The current record for `path`, expired or not.
    fn get(&self, path: &ArtifactPath) -> Result<Option<LockRecord>>;

    /// Every record in the table, sorted by path.
    fn list(&self) -> Result<Vec<LockRecord>>;
}
