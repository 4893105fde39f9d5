//! Ledger events and the state they fold into.
//!
//! Both ledger backends keep the same [`LedgerState`]; the file-backed one
//! additionally journals every [`LedgerEvent`] before applying it, and
//! rebuilds the state on open by replaying the journal.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_types::{ArtifactId, Digest, LedgerEntry, UploadStatus};

/// One state transition of the ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    Inserted {
        entry: LedgerEntry,
    },
    Completed {
        id: ArtifactId,
        digest: Digest,
        at: DateTime<Utc>,
    },
    ErrorRecorded {
        id: ArtifactId,
        message: String,
        at: DateTime<Utc>,
    },
}

/// All attempts, grouped by artifact id in insertion order.
#[derive(Debug, Default)]
pub struct LedgerState {
    attempts: HashMap<ArtifactId, Vec<LedgerEntry>>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The event that inserts a new attempt for `id`, or `None` when an
    /// active entry already exists.
    pub fn plan_insert(
        &self,
        id: &ArtifactId,
        metadata: Value,
        uploader: &str,
        now: DateTime<Utc>,
    ) -> Option<LedgerEvent> {
        let history = self.attempts.get(id).map(Vec::as_slice).unwrap_or_default();
        if history.iter().any(|e| e.status.is_active()) {
            return None;
        }
        let attempt = history.len() as u32 + 1;
        Some(LedgerEvent::Inserted {
            entry: LedgerEntry::pending(id, attempt, metadata, uploader, now),
        })
    }

    /// Whether the latest entry for `id` is pending.
    pub fn has_pending(&self, id: &ArtifactId) -> bool {
        self.latest(id)
            .is_some_and(|e| e.status == UploadStatus::Pending)
    }

    /// Apply `event`. Events that no longer match the state are ignored.
    pub fn apply(&mut self, event: LedgerEvent) {
        match event {
            LedgerEvent::Inserted { entry } => {
                self.attempts.entry(entry.id()).or_default().push(entry);
            }
            LedgerEvent::Completed { id, digest, at } => {
                if let Some(entry) = self.latest_mut(&id) {
                    if entry.status == UploadStatus::Pending {
                        entry.mark_complete(digest, at);
                    }
                }
            }
            LedgerEvent::ErrorRecorded { id, message, at } => {
                if let Some(entry) = self.latest_mut(&id) {
                    entry.push_error(message, at);
                }
            }
        }
    }

    pub fn latest(&self, id: &ArtifactId) -> Option<&LedgerEntry> {
        self.attempts.get(id).and_then(|h| h.last())
    }

    fn latest_mut(&mut self, id: &ArtifactId) -> Option<&mut LedgerEntry> {
        self.attempts.get_mut(id).and_then(|h| h.last_mut())
    }

    pub fn history(&self, id: &ArtifactId) -> Vec<LedgerEntry> {
        self.attempts.get(id).cloned().unwrap_or_default()
    }

    pub fn contains(&self, id: &ArtifactId) -> bool {
        self.attempts.contains_key(id)
    }

    /// Number of distinct artifact ids.
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}
