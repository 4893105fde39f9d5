use std::sync::RwLock;

use chrono::Utc;
use serde_json::Value;
use sluice_types::{ArtifactId, Digest, LedgerEntry};
use tracing::{debug, error, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::state::{LedgerEvent, LedgerState};
use crate::traits::UploadLedger;

/// In-memory upload ledger for tests, local demos, and embedding.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    inner: RwLock<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UploadLedger for InMemoryLedger {
    fn insert(&self, id: &ArtifactId, metadata: Value, uploader: &str) -> LedgerResult<bool> {
        let mut state = self.inner.write().map_err(|_| LedgerError::Poisoned)?;
        match state.plan_insert(id, metadata, uploader, Utc::now()) {
            Some(event) => {
                state.apply(event);
                debug!(artifact = %id, uploader, "ledger entry inserted");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn complete(&self, id: &ArtifactId, digest: Digest) -> LedgerResult<()> {
        let mut state = self.inner.write().map_err(|_| LedgerError::Poisoned)?;
        if !state.has_pending(id) {
            warn!(artifact = %id, "complete without a pending entry; ignored");
            return Ok(());
        }
        state.apply(LedgerEvent::Completed {
            id: id.clone(),
            digest,
            at: Utc::now(),
        });
        Ok(())
    }

    fn record_error(&self, id: &ArtifactId, message: &str) {
        let Ok(mut state) = self.inner.write() else {
            error!(artifact = %id, message, "ledger poisoned; error not recorded");
            return;
        };
        if !state.contains(id) {
            warn!(artifact = %id, message, "no ledger entry to record error against");
            return;
        }
        state.apply(LedgerEvent::ErrorRecorded {
            id: id.clone(),
            message: message.to_string(),
            at: Utc::now(),
        });
    }

    fn exists(&self, id: &ArtifactId) -> LedgerResult<bool> {
        let state = self.inner.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(state.contains(id))
    }

    fn get(&self, id: &ArtifactId) -> LedgerResult<Option<LedgerEntry>> {
        let state = self.inner.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(state.latest(id).cloned())
    }

    fn history(&self, id: &ArtifactId) -> LedgerResult<Vec<LedgerEntry>> {
        let state = self.inner.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(state.history(id))
    }
}
