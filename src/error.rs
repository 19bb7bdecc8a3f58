use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoadError>;
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by a store environment, handle, or transaction.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reserved capacity exhausted: {required} bytes required, {capacity} reserved")]
    CapacityExhausted { required: u64, capacity: u64 },

    #[error("unable to reserve {capacity} bytes of address space")]
    OutOfMemory { capacity: u64 },

    #[error("store at {path:?} is held by another writer")]
    Locked { path: PathBuf },

    #[error("store corrupted at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("invalid store header: {reason}")]
    InvalidHeader { reason: String },

    #[error("key of {len} bytes exceeds the {max} byte limit")]
    KeyTooLarge { len: usize, max: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Recoverable resource pressure reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pressure {
    /// The reserved range is full; a larger range may succeed.
    CapacityExhausted,
    /// The range could not be reserved; a smaller range may succeed.
    OutOfMemory,
}

impl StoreError {
    /// Classify the error for the growth policy. `None` means the error is fatal.
    #[must_use]
    pub fn pressure(&self) -> Option<Pressure> {
        match self {
            Self::CapacityExhausted { .. } => Some(Pressure::CapacityExhausted),
            Self::OutOfMemory { .. } => Some(Pressure::OutOfMemory),
            _ => None,
        }
    }
}

/// Errors surfaced by the bulk loader.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("malformed manifest line {line}: expected `key source_path`, found {content:?}")]
    MalformedManifest { line: usize, content: String },

    #[error("manifest line {line} uses the reserved key {key:?}")]
    ReservedKey { line: usize, key: String },

    #[error("failed to read source for {key:?} at {path:?}: {source}")]
    SourceRead {
        key: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "no viable reserved capacity (last candidate {capacity} bytes, floor {floor} bytes); {committed} records committed"
    )]
    CapacityUnsatisfiable {
        capacity: u64,
        floor: u64,
        committed: usize,
    },

    #[error("store failure after {committed} committed records: {source}")]
    Store {
        committed: usize,
        #[source]
        source: StoreError,
    },

    #[error("invalid loader configuration: {reason}")]
    Config { reason: String },

    #[error("key index encode failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("key index decode failed: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl LoadError {
    /// Records durably committed before the load stopped, when known.
    #[must_use]
    pub fn committed_records(&self) -> Option<usize> {
        match self {
            Self::CapacityUnsatisfiable { committed, .. } | Self::Store { committed, .. } => {
                Some(*committed)
            }
            _ => None,
        }
    }
}
