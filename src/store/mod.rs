//! Transactional key-value store capability consumed by the loader.
//!
//! The loader only depends on the traits in this module. [`MappedEnvironment`]
//! is the production implementation: a memory-mapped append-only record log
//! whose reserved capacity is fixed for the lifetime of each handle.

use std::path::Path;

use crate::error::StoreResult;

mod mapped;
mod reader;

pub use mapped::{MappedEnvironment, MappedStore, WriteTxn};
pub use reader::StoreReader;

/// Opens store handles with a given reserved capacity.
pub trait Environment {
    type Store: Store;

    /// Open (or create) the store at `path`, reserving `capacity` bytes of address space.
    fn open(&self, path: &Path, capacity: u64) -> StoreResult<Self::Store>;
}

/// An open, exclusively owned store handle. Dropping the handle closes it.
pub trait Store {
    type Txn<'a>: Transaction
    where
        Self: 'a;

    /// Start a write transaction. Only one transaction can be live at a time.
    fn begin_write(&mut self) -> StoreResult<Self::Txn<'_>>;

    /// Reserved capacity currently mapped, in bytes.
    fn reserved_capacity(&self) -> u64;

    /// Number of times the store has been reopened with a different capacity.
    fn generation(&self) -> u64;

    /// Force every committed byte to stable storage.
    fn sync(&mut self) -> StoreResult<()>;
}

/// A pending batch of writes. Nothing becomes visible until [`Transaction::commit`].
pub trait Transaction {
    fn put(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Remove `key`. Returns `false` if it was not present.
    fn delete(&mut self, key: &[u8]) -> StoreResult<bool>;

    fn commit(self) -> StoreResult<()>;

    /// Discard every write in the transaction.
    fn abort(self);
}
