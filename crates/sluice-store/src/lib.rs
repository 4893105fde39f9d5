//! Byte storage backends for Sluice.
//!
//! The gateway treats its backing store as an external collaborator: a slow,
//! eventually-consistent filesystem offering only create / append / open /
//! exists / list. Everything above it (locking, ledger, checksums) is built
//! without any transactional help from the store.
//!
//! All backends implement the [`ObjectStore`] trait:
//!
//! - [`InMemoryObjectStore`] -- map-based store with fault injection, for
//!   tests and embedding
//! - [`LocalFsStore`] -- directory-rooted store on the local filesystem
//!
//! # Design Rules
//!
//! 1. Writers stream; nothing requires a whole file in memory.
//! 2. A file is visible as soon as it is created, before its writer closes.
//! 3. Durability is explicit: `flush`, then [`WriteHandle::sync`].
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod fs;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use fs::LocalFsStore;
pub use memory::InMemoryObjectStore;
pub use traits::{ObjectStore, ReadHandle, WriteHandle};
