//! Upload gateway for Sluice.
//!
//! Ties the lock manager, the upload ledger, the checksum pipeline and the
//! stores together. The services work without authentication and are what
//! operator tooling drives directly; the [`Gateway`] facade adds credentials,
//! access bits, auditing and the path prefix for network callers.
//!
//! # Architecture
//!
//! - [`UploadCoordinator`]: lock, ledger, checksummed write, complete
//! - [`ReconciliationService`]: read-only `check` across ledger, lock and store
//! - [`Backends`]: the shared store / ledger / lock wiring, in memory or local
//! - [`Gateway`]: authenticated, audited operations over the services
//! - [`metadata`]: required fields and the metadata-driven layout

pub mod auth;
pub mod backends;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod metadata;
pub mod reconcile;

#[cfg(test)]
mod testing;

pub use auth::{ApiKey, AuditLog, AuditRecord, AuthDb, MemoryAuditLog, StaticAuthDb, TracingAuditLog};
pub use backends::Backends;
pub use config::{AuthConfig, GatewayConfig, LockConfig, ServerConfig, StorageConfig, UploadConfig};
pub use coordinator::{UploadCoordinator, UploadReceipt};
pub use error::{
    ClientError, ConfigError, FaultStage, GatewayError, GatewayResult, OpenError, SecondaryFault,
    ServerFault,
};
pub use gateway::Gateway;
pub use reconcile::{CheckReport, ReconciliationService};

// Re-export the types callers need to build requests and read results.
pub use sluice_types::{AccessLevel, ArtifactId, ArtifactPath, Digest, LedgerEntry, UploadStatus};
