/// Errors produced by ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger state poisoned")]
    Poisoned,

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("journal corrupt at offset {offset}: {reason}")]
    CorruptJournal { offset: u64, reason: String },

    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;
