use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde_json::Value;
use sluice_types::{ArtifactId, Digest, LedgerEntry};
use tracing::{debug, error, info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::journal::Journal;
use crate::state::{LedgerEvent, LedgerState};
use crate::traits::UploadLedger;

/// Upload ledger persisted as an append-only event journal.
///
/// Each mutation is written and synced to the journal before it becomes
/// visible in memory; a failed write leaves the state untouched. Error
/// records are the exception: they are applied in memory even when the
/// journal refuses them, so a failed attempt never stays pending. The full
/// state is rebuilt from the journal on open.
pub struct FileLedger {
    inner: Mutex<Inner>,
}

struct Inner {
    state: LedgerState,
    journal: Journal,
}

impl FileLedger {
    /// Open (or create) the ledger journal at `path` and replay it.
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let (journal, events) = Journal::open(path.as_ref())?;
        let replayed = events.len();
        let mut state = LedgerState::new();
        for event in events {
            state.apply(event);
        }
        info!(
            path = %path.as_ref().display(),
            events = replayed,
            artifacts = state.len(),
            "ledger replayed"
        );
        Ok(Self {
            inner: Mutex::new(Inner { state, journal }),
        })
    }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| LedgerError::Poisoned)
    }
}

impl Inner {
    fn commit(&mut self, event: LedgerEvent) -> LedgerResult<()> {
        self.journal.append(&event)?;
        self.state.apply(event);
        Ok(())
    }
}

impl UploadLedger for FileLedger {
    fn insert(&self, id: &ArtifactId, metadata: Value, uploader: &str) -> LedgerResult<bool> {
        let mut inner = self.lock()?;
        let Some(event) = inner.state.plan_insert(id, metadata, uploader, Utc::now()) else {
            return Ok(false);
        };
        inner.commit(event)?;
        debug!(artifact = %id, uploader, "ledger entry inserted");
        Ok(true)
    }

    fn complete(&self, id: &ArtifactId, digest: Digest) -> LedgerResult<()> {
        let mut inner = self.lock()?;
        if !inner.state.has_pending(id) {
            warn!(artifact = %id, "complete without a pending entry; ignored");
            return Ok(());
        }
        inner.commit(LedgerEvent::Completed {
            id: id.clone(),
            digest,
            at: Utc::now(),
        })
    }

    fn record_error(&self, id: &ArtifactId, message: &str) {
        let mut inner = match self.lock() {
            Ok(inner) => inner,
            Err(e) => {
                error!(artifact = %id, message, error = %e, "error not recorded");
                return;
            }
        };
        if !inner.state.contains(id) {
            warn!(artifact = %id, message, "no ledger entry to record error against");
            return;
        }
        let event = LedgerEvent::ErrorRecorded {
            id: id.clone(),
            message: message.to_string(),
            at: Utc::now(),
        };
        if let Err(e) = inner.journal.append(&event) {
            error!(
                artifact = %id,
                message,
                error = %e,
                "failed to journal upload error; recorded in memory only"
            );
        }
        inner.state.apply(event);
    }

    fn exists(&self, id: &ArtifactId) -> LedgerResult<bool> {
        Ok(self.lock()?.state.contains(id))
    }

    fn get(&self, id: &ArtifactId) -> LedgerResult<Option<LedgerEntry>> {
        Ok(self.lock()?.state.latest(id).cloned())
    }

    fn history(&self, id: &ArtifactId) -> LedgerResult<Vec<LedgerEntry>> {
        Ok(self.lock()?.state.history(id))
    }
}
