//! Key index persisted under the sentinel key at the end of a successful load.
//!
//! Downstream readers enumerate a store exclusively through this index. Its
//! absence means the load that produced the store did not finish.

use bincode::config;
use bincode::serde::{decode_from_slice, encode_to_vec};
use serde::{Deserialize, Serialize};

use crate::constants::KEY_INDEX_VERSION;
use crate::error::{LoadError, Result, StoreResult};
use crate::store::{Store, StoreReader, Transaction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyIndex {
    pub version: u16,
    /// Keys in the order they were put.
    pub keys: Vec<String>,
}

impl KeyIndex {
    #[must_use]
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            version: KEY_INDEX_VERSION,
            keys,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(encode_to_vec(self, config::standard())?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (index, _): (Self, usize) = decode_from_slice(bytes, config::standard())?;
        if index.version != KEY_INDEX_VERSION {
            return Err(LoadError::Config {
                reason: format!("unsupported key index version {}", index.version),
            });
        }
        Ok(index)
    }

    /// Put already-encoded index bytes under `sentinel` in a dedicated transaction.
    pub fn write_encoded<S: Store>(store: &mut S, sentinel: &str, bytes: &[u8]) -> StoreResult<()> {
        let mut txn = store.begin_write()?;
        if let Err(err) = txn.put(sentinel.as_bytes(), bytes) {
            txn.abort();
            return Err(err);
        }
        txn.commit()
    }

    /// Load the index from a finished store. `Ok(None)` marks an incomplete load.
    pub fn read_from(reader: &StoreReader, sentinel: &str) -> Result<Option<Self>> {
        reader
            .get(sentinel.as_bytes())
            .map(Self::decode)
            .transpose()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
