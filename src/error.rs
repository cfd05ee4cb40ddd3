//! Error taxonomy for the engine (spec §6.4 / §7).
//!
//! Every fallible operation in this crate returns [`Result<T>`]. Errors are
//! grouped the way the spec groups them (invariant/corruption, capacity,
//! semantic, concurrency, durability) rather than as one flat enum, so
//! callers can match on the group when they only care about, say, whether
//! a commit may be retried.

use std::io;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Invariant / on-disk corruption errors.
#[derive(Debug, thiserror::Error)]
pub enum CorruptionError {
    #[error("page {0} failed its header/checksum validation")]
    BadPage(u64),
    #[error("page {0} was expected but is not present in the file")]
    PageNotFound(u64),
    #[error("meta page signature does not match the expected magic")]
    BadSignature,
    #[error("data file format version {found} is incompatible (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },
    #[error("file does not look like a valid database (all meta pages are invalid)")]
    InvalidFile,
    #[error("meta page is torn: txnid_a != txnid_b ({a} != {b})")]
    TornMeta { a: u64, b: u64 },
}

/// Capacity-related errors.
#[derive(Debug, thiserror::Error)]
pub enum CapacityError {
    #[error("database map is full (geometry ceiling reached)")]
    MapFull,
    #[error("value of {0} bytes exceeds the maximum for this pagesize")]
    TooLarge(usize),
    #[error("maximum number of named tables reached")]
    DbsFull,
    #[error("reader table is full")]
    ReadersFull,
    #[error("transaction has too many dirty/retired pages")]
    TxnFull,
}

/// Semantic (expected, recoverable) errors.
#[derive(Debug, thiserror::Error)]
pub enum SemanticError {
    #[error("key not found")]
    NotFound,
    #[error("key already exists")]
    KeyExist,
    #[error("append key is out of order")]
    KeyMismatch,
    #[error("table flags are incompatible with this operation")]
    Incompatible,
    #[error("value size is invalid for this table")]
    BadValSize,
    #[error("key has multiple values and a single-value operation was used")]
    MultiValue,
    #[error("dbi handle is invalid or stale")]
    BadDbi,
    #[error("transaction handle is invalid, already committed, or poisoned")]
    BadTxn,
    #[error("reader slot handle is invalid")]
    BadRslot,
}

/// Concurrency-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConcurrencyError {
    #[error("resource busy, try again")]
    Busy,
    #[error("operation invoked from the wrong thread for this object")]
    ThreadMismatch,
    #[error("transaction overlaps with another transaction on this thread")]
    TxnOverlapping,
    #[error("snapshot is older than the oldest retained version (MVCC retarded)")]
    MvccRetarded,
    #[error("reader was ousted by the writer while parked")]
    Ousted,
    #[error("a laggard reader is blocking reclamation")]
    LaggardReader,
}

/// Durability-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DurabilityError {
    #[error("database requires recovery before it can be used")]
    WannaRecovery,
    #[error("environment is in a fatal/panicked state; close and reopen")]
    Panic,
}

/// The top-level error type returned by every public operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Corruption(#[from] CorruptionError),
    #[error(transparent)]
    Capacity(#[from] CapacityError),
    #[error(transparent)]
    Semantic(#[from] SemanticError),
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),
    #[error(transparent)]
    Durability(#[from] DurabilityError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// True for [`CapacityError::MapFull`], which callers may choose to
    /// ignore and retry with a smaller batch (spec §7).
    pub fn is_map_full(&self) -> bool {
        matches!(self, Error::Capacity(CapacityError::MapFull))
    }

    /// True when the env-wide `FATAL_ERROR`/`PANIC` state has been entered
    /// and every subsequent env-wide operation must fail until reopen.
    pub fn is_panic(&self) -> bool {
        matches!(self, Error::Durability(DurabilityError::Panic))
    }
}
