//! Locked, ledgered, checksummed uploads.
//!
//! Every upload follows the same protocol:
//!
//! 1. validate identity, metadata and names (client errors, nothing touched)
//! 2. take the physical-path lock without waiting ("busy" if held)
//! 3. insert a pending ledger entry ("duplicate" if one is active)
//! 4. stream the body through a checksum into the store
//! 5. mark the entry complete with the digest
//!
//! A failure in steps 3 to 5 is written to the ledger's error history before
//! it is surfaced as an opaque server error. The lock is released exactly
//! once on every path; a failed release or close is also written to the
//! ledger, but only reaches the caller as a [`SecondaryFault`] reference.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_crypto::{pump, ChecksumError, ChecksumReader, ChecksumWriter};
use sluice_ledger::{LedgerError, UploadLedger};
use sluice_lock::{LockGuard, LockManager};
use sluice_pack::{PackError, PackedStore};
use sluice_store::{ObjectStore, StoreError};
use sluice_types::{ArtifactId, ArtifactPath, Digest};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{ClientError, FaultStage, GatewayError, GatewayResult, SecondaryFault};
use crate::metadata;

/// Outcome of a successful upload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub id: ArtifactId,
    pub digest: Digest,
    /// Payload bytes received (before any container compression).
    pub bytes: u64,
    /// Ledger attempt number. `None` for raw puts, which are not ledgered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Cleanup problems that did not change the outcome.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary_faults: Vec<SecondaryFault>,
}

/// Failure inside the locked section of an upload.
#[derive(Debug, Error)]
enum StepError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("checksum: {0}")]
    Checksum(#[from] ChecksumError),

    #[error("packed store: {0}")]
    Pack(#[from] PackError),

    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("failed to close write handle: {0}")]
    Close(io::Error),

    /// The write failed and closing the handle afterwards failed too.
    #[error("{cause} (closing the handle also failed: {close})")]
    Abandoned { cause: Box<StepError>, close: io::Error },
}

/// Drives uploads through lock, ledger, checksum and storage.
#[derive(Clone)]
pub struct UploadCoordinator {
    store: Arc<dyn ObjectStore>,
    packed: PackedStore,
    ledger: Arc<dyn UploadLedger>,
    locks: LockManager,
    chunk_size: usize,
    required_fields: Vec<String>,
}

impl UploadCoordinator {
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
            required_fields: Vec::new(),
        }
    }

    /// Metadata fields every upload must carry as non-empty strings.
    pub fn with_required_fields(mut self, fields: Vec<String>) -> Self {
        self.required_fields = fields;
        self
    }

    /// Upload a new plain file at `path`.
    ///
    /// Rejected with [`ClientError::AlreadyExists`] if a file is already
    /// stored there; use [`Self::put`] to overwrite.
    pub fn upload(
        &self,
        path: &ArtifactPath,
        metadata: Value,
        uploader: &str,
        body: &mut dyn Read,
    ) -> GatewayResult<UploadReceipt> {
        check_uploader(uploader)?;
        metadata::require_fields(&metadata, &self.required_fields)?;
        let exists = self
            .store
            .exists(path)
            .map_err(|e| GatewayError::server("upload", &e))?;
        if exists {
            return Err(ClientError::AlreadyExists(path.clone()).into());
        }

        let id = ArtifactId::plain(path.clone());
        self.coordinate("upload", &id, Some((metadata, uploader)), || {
            self.write_plain(path, body)
        })
    }

    /// Append `body` as record `id.logical_key` to the container at `id.path`.
    pub fn packed_upload(
        &self,
        id: &ArtifactId,
        metadata: Value,
        uploader: &str,
        body: &mut dyn Read,
    ) -> GatewayResult<UploadReceipt> {
        check_uploader(uploader)?;
        metadata::require_fields(&metadata, &self.required_fields)?;
        let Some(key) = id.logical_key.as_deref() else {
            return Err(ClientError::InvalidPath(format!("{id} has no record key")).into());
        };

        self.coordinate("packed_upload", id, Some((metadata, uploader)), || {
            let mut reader = ChecksumReader::new(body);
            let mut payload = Vec::new();
            let bytes = pump(&mut reader, &mut payload, self.chunk_size)?;
            let digest = reader.digest()?;
            self.packed.append(&id.path, key, &payload)?;
            Ok((digest, bytes))
        })
    }

    /// Create or truncate `path` and write `body` to it, without a ledger
    /// entry.
    pub fn put(&self, path: &ArtifactPath, body: &mut dyn Read) -> GatewayResult<UploadReceipt> {
        let id = ArtifactId::plain(path.clone());
        self.coordinate("put", &id, None, || self.write_plain(path, body))
    }

    fn coordinate<F>(
        &self,
        operation: &'static str,
        id: &ArtifactId,
        entry: Option<(Value, &str)>,
        store: F,
    ) -> GatewayResult<UploadReceipt>
    where
        F: FnOnce() -> Result<(Digest, u64), StepError>,
    {
        let ledgered = entry.is_some();
        let guard = self.acquire(operation, &id.path)?;
        let outcome = self.locked_section(operation, id, entry, store);
        let released = guard.release();

        match outcome {
            Ok((attempt, digest, bytes)) => {
                let mut receipt = UploadReceipt {
                    id: id.clone(),
                    digest,
                    bytes,
                    attempt,
                    secondary_faults: Vec::new(),
                };
                if let Err(e) = released {
                    let fault = self.release_fault(operation, id, ledgered, &e);
                    receipt.secondary_faults.push(fault);
                }
                info!(
                    id = %id,
                    operation,
                    digest = %digest,
                    bytes,
                    attempt = ?attempt,
                    "upload complete"
                );
                Ok(receipt)
            }
            Err(err) => {
                if let Err(e) = released {
                    // A client error means the entry, if any, is another uploader's.
                    self.release_fault(operation, id, ledgered && !err.is_client(), &e);
                }
                Err(err)
            }
        }
    }

    /// Record a failed lock release against the attempt and return the
    /// opaque fault the caller sees.
    fn release_fault(
        &self,
        operation: &str,
        id: &ArtifactId,
        ledgered: bool,
        err: &dyn fmt::Display,
    ) -> SecondaryFault {
        if ledgered {
            self.ledger
                .record_error(id, &format!("{}: {err}", FaultStage::ReleaseLock));
        }
        SecondaryFault::logged(FaultStage::ReleaseLock, operation, err)
    }

    fn acquire(&self, operation: &str, path: &ArtifactPath) -> GatewayResult<LockGuard> {
        match self.locks.try_acquire(path) {
            Ok(Some(guard)) => Ok(guard),
            Ok(None) => {
                debug!(path = %path, operation, "artifact busy");
                Err(ClientError::Busy(path.clone()).into())
            }
            Err(e) => Err(GatewayError::server(operation, &e)),
        }
    }

    /// Steps 3 to 5. Runs with the lock held.
    fn locked_section<F>(
        &self,
        operation: &'static str,
        id: &ArtifactId,
        entry: Option<(Value, &str)>,
        store: F,
    ) -> GatewayResult<(Option<u32>, Digest, u64)>
    where
        F: FnOnce() -> Result<(Digest, u64), StepError>,
    {
        let ledgered = entry.is_some();
        let attempt = match entry {
            Some((metadata, uploader)) => match self.begin_attempt(id, metadata, uploader) {
                Ok(Some(attempt)) => Some(attempt),
                Ok(None) => return Err(ClientError::Duplicate(id.clone()).into()),
                Err(e) => return Err(self.fail(operation, id, e)),
            },
            None => None,
        };

        let (digest, bytes) = store().map_err(|e| self.fail(operation, id, e))?;

        if ledgered {
            self.ledger
                .complete(id, digest)
                .map_err(|e| self.fail(operation, id, e.into()))?;
        }
        Ok((attempt, digest, bytes))
    }

    /// Insert the pending entry. `None` if another attempt is active.
    fn begin_attempt(
        &self,
        id: &ArtifactId,
        metadata: Value,
        uploader: &str,
    ) -> Result<Option<u32>, StepError> {
        if !self.ledger.insert(id, metadata, uploader)? {
            return Ok(None);
        }
        let attempt = self.ledger.get(id)?.map(|entry| entry.attempt).unwrap_or(1);
        Ok(Some(attempt))
    }

    fn fail(&self, operation: &str, id: &ArtifactId, err: StepError) -> GatewayError {
        match err {
            StepError::Abandoned { cause, close } => {
                self.ledger.record_error(id, &cause.to_string());
                self.ledger
                    .record_error(id, &format!("{}: {close}", FaultStage::CloseHandle));
                warn!(id = %id, operation, error = %close, "failed to close handle after failed write");
                GatewayError::server(operation, &format_args!("{id}: {cause}"))
            }
            err => {
                self.ledger.record_error(id, &err.to_string());
                GatewayError::server(operation, &format_args!("{id}: {err}"))
            }
        }
    }

    fn write_plain(&self, path: &ArtifactPath, body: &mut dyn Read) -> Result<(Digest, u64), StepError> {
        let mut writer = ChecksumWriter::new(self.store.create(path)?);

        let streamed = pump(body, &mut writer, self.chunk_size).and_then(|n| {
            writer.flush()?;
            writer.get_mut().sync()?;
            Ok(n)
        });
        let bytes = match streamed {
            Ok(n) => n,
            Err(e) => {
                let cause = StepError::from(e);
                return Err(match writer.into_inner().close() {
                    Ok(()) => cause,
                    Err(close) => StepError::Abandoned {
                        cause: Box::new(cause),
                        close,
                    },
                });
            }
        };

        let (digest, handle) = writer.finish()?;
        handle.close().map_err(StepError::Close)?;
        Ok((digest, bytes))
    }
}

impl std::fmt::Debug for UploadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCoordinator")
            .field("chunk_size", &self.chunk_size)
            .field("required_fields", &self.required_fields)
            .finish_non_exhaustive()
    }
}

fn check_uploader(uploader: &str) -> GatewayResult<()> {
    if uploader.trim().is_empty() {
        return Err(GatewayError::Unauthorized);
    }
    Ok(())
}
