use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifact::{ArtifactId, ArtifactPath};
use crate::digest::Digest;

/// Lifecycle status of one upload attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Complete,
    Failed,
}

impl UploadStatus {
    /// Whether an entry in this status blocks a new upload of the same artifact.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

/// One failure recorded against an upload attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Ledger record of a single upload attempt and its provenance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub path: ArtifactPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_key: Option<String>,
    /// 1-based attempt number for this artifact id.
    pub attempt: u32,
    pub metadata: Value,
    pub uploader: String,
    pub status: UploadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
    #[serde(default)]
    pub error_history: Vec<ErrorRecord>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    /// A fresh pending entry.
    pub fn pending(
        id: &ArtifactId,
        attempt: u32,
        metadata: Value,
        uploader: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            path: id.path.clone(),
            logical_key: id.logical_key.clone(),
            attempt,
            metadata,
            uploader: uploader.into(),
            status: UploadStatus::Pending,
            digest: None,
            error_history: Vec::new(),
            created_at,
            completed_at: None,
        }
    }

    pub fn id(&self) -> ArtifactId {
        ArtifactId {
            path: self.path.clone(),
            logical_key: self.logical_key.clone(),
        }
    }

    /// Stamp the digest and move to [`UploadStatus::Complete`].
    pub fn mark_complete(&mut self, digest: Digest, at: DateTime<Utc>) {
        self.status = UploadStatus::Complete;
        self.digest = Some(digest);
        self.completed_at = Some(at);
    }

    /// Append a failure. A pending entry becomes [`UploadStatus::Failed`];
    /// a completed entry keeps its status and digest.
    pub fn push_error(&mut self, message: impl Into<String>, at: DateTime<Utc>) {
        self.error_history.push(ErrorRecord {
            at,
            message: message.into(),
        });
        if self.status == UploadStatus::Pending {
            self.status = UploadStatus::Failed;
        }
    }
}
