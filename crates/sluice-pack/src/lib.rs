//! Packed-record containers for Sluice.
//!
//! A packed container multiplexes many small logical files into one
//! physical file in the backing store. Containers are append-only: each
//! record carries its key, its zstd-compressed payload and a CRC32 of the
//! stored bytes.
//!
//! # Architecture
//!
//! - [`format`]: container header, record encoding and varints
//! - [`RecordReader`]: forward-only scanner that skips payloads it is not
//!   asked for
//! - [`PackedStore`]: append / lookup / list over an
//!   [`ObjectStore`](sluice_store::ObjectStore)
//! - [`PackKeys`]: lazy key iterator

pub mod error;
pub mod format;
pub mod reader;
pub mod store;

pub use error::{PackError, PackResult};
pub use reader::RecordReader;
pub use store::{PackKeys, PackedStore};
