use serde_json::Value;
use sluice_types::{ArtifactId, Digest, LedgerEntry};

use crate::error::LedgerResult;

/// Persistent record of upload attempts.
///
/// For one [`ArtifactId`] at most one entry is ever active (pending or
/// complete). Failed entries stay in the history and do not block a new
/// attempt.
pub trait UploadLedger: Send + Sync {
    /// Create a pending entry. `Ok(false)` if an active entry already exists.
    fn insert(&self, id: &ArtifactId, metadata: Value, uploader: &str) -> LedgerResult<bool>;

    /// Move the pending entry for `id` to complete. No pending entry is a
    /// logged no-op.
    fn complete(&self, id: &ArtifactId, digest: Digest) -> LedgerResult<()>;

    /// Append `message` to the latest entry's error history, failing it if
    /// pending. Best effort: never fails, problems are logged.
    fn record_error(&self, id: &ArtifactId, message: &str);

    /// Whether any entry, in any status, exists for `id`.
    fn exists(&self, id: &ArtifactId) -> LedgerResult<bool>;

    /// The most recent entry for `id`.
    fn get(&self, id: &ArtifactId) -> LedgerResult<Option<LedgerEntry>>;

    /// Every attempt for `id`, oldest first.
    fn history(&self, id: &ArtifactId) -> LedgerResult<Vec<LedgerEntry>>;
}
