use std::sync::Arc;

use sluice_ledger::{FileLedger, InMemoryLedger, UploadLedger};
use sluice_lock::{FileLockTable, InMemoryLockTable, LockManager};
use sluice_pack::PackedStore;
use sluice_store::{InMemoryObjectStore, LocalFsStore, ObjectStore};
use tracing::info;

use crate::config::GatewayConfig;
use crate::coordinator::UploadCoordinator;
use crate::error::OpenError;
use crate::reconcile::ReconciliationService;

/// The three stateful dependencies every gateway service shares.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn ObjectStore>,
    pub ledger: Arc<dyn UploadLedger>,
    pub locks: LockManager,
}

impl Backends {
    /// Process-local backends. Nothing survives a restart.
    pub fn in_memory(config: &GatewayConfig) -> Self {
        Self {
            store: Arc::new(InMemoryObjectStore::new()),
            ledger: Arc::new(InMemoryLedger::new()),
            locks: LockManager::new(Arc::new(InMemoryLockTable::new()))
                .with_lease(config.lock.lease_ttl()),
        }
    }

    /// Directory store, journal ledger and lock directory from
    /// `config.storage`. Directories are created as needed.
    pub fn open_local(config: &GatewayConfig) -> Result<Self, OpenError> {
        let storage = &config.storage;
        let store = LocalFsStore::open(&storage.root)?;
        let ledger = FileLedger::open(&storage.ledger_journal)?;
        let table = FileLockTable::open(&storage.lock_dir)?;
        info!(
            root = %storage.root.display(),
            journal = %storage.ledger_journal.display(),
            locks = %storage.lock_dir.display(),
            "opened local backends"
        );
        Ok(Self {
            store: Arc::new(store),
            ledger: Arc::new(ledger),
            locks: LockManager::new(Arc::new(table)).with_lease(config.lock.lease_ttl()),
        })
    }

    pub fn coordinator(&self, config: &GatewayConfig) -> UploadCoordinator {
        UploadCoordinator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.ledger),
            self.locks.clone(),
            config.chunk_size,
        )
        .with_required_fields(config.upload.required_fields.clone())
    }

    pub fn reconciler(&self, config: &GatewayConfig) -> ReconciliationService {
        ReconciliationService::new(
            Arc::clone(&self.store),
            Arc::clone(&self.ledger),
            self.locks.clone(),
            config.chunk_size,
        )
    }

    pub fn packed(&self) -> PackedStore {
        PackedStore::new(Arc::clone(&self.store))
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}
