use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sluice_ledger::LedgerError;
use sluice_lock::LockError;
use sluice_store::StoreError;
use sluice_types::{ArtifactId, ArtifactPath};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// A request the caller can fix. Surfaced verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("file is busy: {0}")]
    Busy(ArtifactPath),

    #[error("upload entry already exists: {0}")]
    Duplicate(ArtifactId),

    #[error("path already exists: {0}")]
    AlreadyExists(ArtifactPath),
}

/// Opaque server-side failure.
///
/// The full detail goes to the log under `reference`; callers only see the
/// reference and the time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("internal error, please contact the administrator (ref {reference} at {at})")]
pub struct ServerFault {
    pub reference: String,
    pub at: DateTime<Utc>,
}

impl ServerFault {
    /// Log `detail` under a fresh reference and return the opaque fault.
    pub fn logged(context: &str, detail: &dyn fmt::Display) -> Self {
        let fault = Self {
            reference: Uuid::now_v7().simple().to_string(),
            at: Utc::now(),
        };
        error!(reference = %fault.reference, context, error = %detail, "server fault");
        fault
    }
}

/// Where a cleanup failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultStage {
    CloseHandle,
    ReleaseLock,
}

impl fmt::Display for FaultStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CloseHandle => f.write_str("close handle"),
            Self::ReleaseLock => f.write_str("release lock"),
        }
    }
}

/// A cleanup failure that did not decide the outcome of the operation.
///
/// Like [`ServerFault`], the detail stays in the log under `reference`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryFault {
    pub stage: FaultStage,
    pub reference: String,
}

impl SecondaryFault {
    /// Log `detail` under a fresh reference and return the opaque fault.
    pub fn logged(stage: FaultStage, context: &str, detail: &dyn fmt::Display) -> Self {
        let fault = Self {
            stage,
            reference: Uuid::now_v7().simple().to_string(),
        };
        warn!(
            reference = %fault.reference,
            context,
            stage = %stage,
            error = %detail,
            "cleanup failed"
        );
        fault
    }
}

impl fmt::Display for SecondaryFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed (ref {})", self.stage, self.reference)
    }
}

/// Errors returned by gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid API token or insufficient access")]
    Unauthorized,

    #[error(transparent)]
    Server(#[from] ServerFault),
}

impl GatewayError {
    /// Log `detail` and wrap it as an opaque server error.
    pub fn server(context: &str, detail: &dyn fmt::Display) -> Self {
        Self::Server(ServerFault::logged(context, detail))
    }

    pub fn is_client(&self) -> bool {
        matches!(self, Self::Client(_))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors loading or validating [`GatewayConfig`](crate::GatewayConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors opening the local backends named by a
/// [`StorageConfig`](crate::config::StorageConfig).
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("object store: {0}")]
    Store(#[from] StoreError),

    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    #[error("lock table: {0}")]
    Lock(#[from] LockError),
}
