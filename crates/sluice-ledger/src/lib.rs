//! Upload ledger for the Sluice gateway.
//!
//! The ledger records one entry per upload attempt: who uploaded, with what
//! metadata, how it ended, and every error seen along the way. It provides:
//! - The [`UploadLedger`] trait boundary
//! - [`InMemoryLedger`] for tests and embedding
//! - [`FileLedger`], a journal-backed ledger replayed on open
//! - [`LedgerEvent`] / [`LedgerState`], the event fold both backends share

pub mod error;
pub mod file;
pub mod journal;
pub mod memory;
pub mod state;
pub mod traits;

pub use error::{LedgerError, LedgerResult};
pub use file::FileLedger;
pub use journal::Journal;
pub use memory::InMemoryLedger;
pub use state::{LedgerEvent, LedgerState};
pub use traits::UploadLedger;
