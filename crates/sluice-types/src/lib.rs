//! Foundation types for Sluice.
//!
//! This crate provides the identity, integrity and provenance types shared by
//! every other Sluice crate.
//!
//! # Key Types
//!
//! - [`ArtifactPath`]: canonical physical path; the lock and ledger key
//! - [`ArtifactId`]: path plus optional logical key inside a packed container
//! - [`Digest`]: 160-bit content digest, lowercase hex on the wire
//! - [`LedgerEntry`]: one upload attempt and its lifecycle
//! - [`AccessLevel`]: access bits granted to a credential
//!
//! Name validation lives in [`names`].

pub mod access;
pub mod artifact;
pub mod digest;
pub mod entry;
pub mod error;
pub mod names;

pub use access::AccessLevel;
pub use artifact::{ArtifactId, ArtifactPath};
pub use digest::{Digest, DIGEST_LEN};
pub use entry::{ErrorRecord, LedgerEntry, UploadStatus};
pub use error::TypeError;
