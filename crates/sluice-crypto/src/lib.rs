//! Streaming checksum pipeline for Sluice.
//!
//! Computes a SHA-1 content digest incrementally while bytes stream between a
//! client and the backing store, so an artifact never has to sit in memory
//! in full. The digest is only handed out once the stream is exhausted.
//!
//! - [`ContentHasher`]: incremental hasher
//! - [`ChecksumReader`] / [`ChecksumWriter`]: `Read` / `Write` adapters
//! - [`pump`]: chunked copy with a configurable chunk size

pub mod error;
pub mod hasher;
pub mod pipeline;

pub use error::{ChecksumError, ChecksumResult};
pub use hasher::ContentHasher;
pub use pipeline::{digest_stream, pump, ChecksumReader, ChecksumWriter, DEFAULT_CHUNK_SIZE};
