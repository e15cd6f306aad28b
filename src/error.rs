use thiserror::Error;

/// Error taxonomy for the storage engine core. Every fallible operation
/// returns one of these kinds instead of a stringly-typed error.
#[derive(Error, Debug)]
pub enum FlintError {
    #[error("row fails schema validation: {0}")]
    SchemaViolation(String),

    #[error("schema fingerprint mismatch: expected {expected:#x}, found {found:#x}")]
    SchemaMismatch { expected: u64, found: u64 },

    #[error("duplicate key in unique index {index:?}")]
    DuplicateKey { index: String },

    #[error("key or rowid not found")]
    NotFound,

    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    #[error("unrecoverable WAL: {0}")]
    WalCorrupt(String),

    #[error("buffer pool exhausted, no frame available for eviction")]
    NoFrame,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("operation on a closed handle")]
    UseAfterEnd,
}

pub type Result<T> = std::result::Result<T, FlintError>;
