//! Non-blocking external mutex for the Sluice upload gateway.
//!
//! Every physical artifact path has at most one lock holder. Acquisition
//! never waits: callers get either a [`LockGuard`] or "busy" and report the
//! conflict upstream. Guards release on drop, so a lock is freed on every
//! exit path of the work it protects.
//!
//! # Modules
//!
//! - [`error`] -- Error types for lock operations
//! - [`traits`] -- The [`LockTable`] persistence trait and [`LockRecord`]
//! - [`memory`] -- Process-local [`InMemoryLockTable`]
//! - [`file`] -- Directory-backed [`FileLockTable`] shared across processes
//! - [`manager`] -- [`LockManager`] and its scoped [`LockGuard`]
//!
//! # Leases
//!
//! Locks carry an optional expiry. With no lease configured a lock lives
//! until released, and a crashed holder must be cleared with
//! [`LockManager::force_release`].

pub mod error;
pub mod file;
pub mod manager;
pub mod memory;
pub mod traits;

pub use error::{LockError, Result};
pub use file::FileLockTable;
pub use manager::{LockGuard, LockManager};
pub use memory::InMemoryLockTable;
pub use traits::{AcquireOutcome, LockRecord, LockTable, LockToken};
