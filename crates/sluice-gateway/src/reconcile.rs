use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sluice_crypto::digest_stream;
use sluice_ledger::UploadLedger;
use sluice_lock::LockManager;
use sluice_pack::PackedStore;
use sluice_store::ObjectStore;
use sluice_types::{ArtifactId, ArtifactPath, Digest, LedgerEntry};
use tracing::debug;

use crate::error::{FaultStage, GatewayError, GatewayResult, SecondaryFault};

/// Combined view of one artifact across the ledger, the lock table and the
/// store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckReport {
    pub path: ArtifactPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_key: Option<String>,
    pub ledger_present: bool,
    /// A plain file, or the packed container, is stored at `path`.
    pub file_present: bool,
    /// Another worker held the lock, so the content was not read.
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_entry: Option<LedgerEntry>,
    /// Packed checks that read the container: whether the key was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_in_container: Option<bool>,
    /// Digest of the stored bytes, computed during this check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_digest: Option<Digest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary_faults: Vec<SecondaryFault>,
}

impl CheckReport {
    fn new(id: &ArtifactId) -> Self {
        Self {
            path: id.path.clone(),
            logical_key: id.logical_key.clone(),
            ledger_present: false,
            file_present: false,
            locked: false,
            ledger_entry: None,
            file_in_container: None,
            observed_digest: None,
            secondary_faults: Vec::new(),
        }
    }

    /// Whether the stored bytes match the digest the ledger recorded.
    /// `None` if either side is unknown.
    pub fn digest_matches(&self) -> Option<bool> {
        let recorded = self.ledger_entry.as_ref()?.digest?;
        Some(recorded == self.observed_digest?)
    }
}

/// What a verification read found.
struct Observation {
    digest: Option<Digest>,
    in_container: Option<bool>,
}

/// Read-only reconciliation of ledger, lock and storage state.
///
/// Never waits on a lock: if a writer holds the artifact the report says
/// `locked` and the content is left alone.
#[derive(Clone)]
pub struct ReconciliationService {
    store: Arc<dyn ObjectStore>,
    packed: PackedStore,
    ledger: Arc<dyn UploadLedger>,
    locks: LockManager,
    chunk_size: usize,
}

impl ReconciliationService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ledger: Arc<dyn UploadLedger>,
        locks: LockManager,
        chunk_size: usize,
    ) -> Self {
        Self {
            packed: PackedStore::new(Arc::clone(&store)),
            store,
            ledger,
            locks,
            chunk_size,
        }
    }

    /// Check a plain file.
    pub fn check(&self, path: &ArtifactPath) -> GatewayResult<CheckReport> {
        let id = ArtifactId::plain(path.clone());
        self.reconcile(&id, || {
            let handle = self
                .store
                .open(path)
                .map_err(|e| GatewayError::server("check", &e))?;
            let (digest, bytes) = digest_stream(handle, self.chunk_size)
                .map_err(|e| GatewayError::server("check", &e))?;
            debug!(path = %path, bytes, "verified stored file");
            Ok(Observation {
                digest: Some(digest),
                in_container: None,
            })
        })
    }

    /// Check one record of a packed container. `id` must carry a key.
    pub fn packed_check(&self, id: &ArtifactId) -> GatewayResult<CheckReport> {
        let Some(key) = id.logical_key.as_deref() else {
            return self.check(&id.path);
        };
        self.reconcile(id, || {
            let payload = self
                .packed
                .lookup(&id.path, key)
                .map_err(|e| GatewayError::server("packed_check", &format_args!("{id}: {e}")))?;
            let Some(payload) = payload else {
                return Ok(Observation {
                    digest: None,
                    in_container: Some(false),
                });
            };
            let (digest, _) = digest_stream(payload.as_slice(), self.chunk_size)
                .map_err(|e| GatewayError::server("packed_check", &e))?;
            Ok(Observation {
                digest: Some(digest),
                in_container: Some(true),
            })
        })
    }

    fn reconcile<F>(&self, id: &ArtifactId, read: F) -> GatewayResult<CheckReport>
    where
        F: FnOnce() -> GatewayResult<Observation>,
    {
        let mut report = CheckReport::new(id);

        report.ledger_present = self
            .ledger
            .exists(id)
            .map_err(|e| GatewayError::server("check", &e))?;
        if report.ledger_present {
            report.ledger_entry = self
                .ledger
                .get(id)
                .map_err(|e| GatewayError::server("check", &e))?;
        }

        report.file_present = self
            .store
            .is_file(&id.path)
            .map_err(|e| GatewayError::server("check", &e))?;
        if !report.file_present {
            return Ok(report);
        }

        let guard = match self.locks.try_acquire(&id.path) {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                debug!(id = %id, "artifact locked, skipping content check");
                report.locked = true;
                return Ok(report);
            }
            Err(e) => return Err(GatewayError::server("check", &e)),
        };

        let observed = read();
        let released = guard.release();

        let observation = match observed {
            Ok(observation) => observation,
            Err(err) => {
                if let Err(e) = released {
                    SecondaryFault::logged(FaultStage::ReleaseLock, "check", &e);
                }
                return Err(err);
            }
        };
        if let Err(e) = released {
            let fault = SecondaryFault::logged(FaultStage::ReleaseLock, "check", &e);
            debug!(id = %id, reference = %fault.reference, "check finished despite cleanup failure");
            report.secondary_faults.push(fault);
        }

        report.observed_digest = observation.digest;
        report.file_in_container = observation.in_container;
        Ok(report)
    }
}

impl std::fmt::Debug for ReconciliationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationService")
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}
