use std::path::{Path, PathBuf};

use memmap2::Mmap;

use super::mapped::{SlotMap, build_index, value_of};
use crate::constants::{DATA_FILE_NAME, HEADER_SIZE};
use crate::error::{StoreError, StoreResult};
use crate::io::header::{HeaderCodec, StoreHeader};
use crate::lock::{FileLock, LockMode};

/// Read-only view of a store, as seen by downstream consumers.
///
/// Holds a shared lock, so it cannot be opened while a loader is writing.
#[derive(Debug)]
pub struct StoreReader {
    path: PathBuf,
    lock: FileLock,
    map: Mmap,
    header: StoreHeader,
    slots: SlotMap,
}

impl StoreReader {
    pub fn open<P: AsRef<Path>>(dir: P) -> StoreResult<Self> {
        let path = dir.as_ref().join(DATA_FILE_NAME);
        let (file, _) = fs_err::File::open(&path)?.into_parts();
        let lock = FileLock::try_acquire(&file, &path, LockMode::Shared)?;

        let file_len = file.metadata()?.len();
        if file_len < HEADER_SIZE as u64 {
            return Err(StoreError::InvalidHeader {
                reason: format!("data file is {file_len} bytes, shorter than header page"),
            });
        }
        // SAFETY: the shared lock keeps writers out for the lifetime of the map.
        let map = unsafe { Mmap::map(&file)? };
        let header = HeaderCodec::decode(&map[..HEADER_SIZE])?;
        let slots = build_index(&map, header.committed_end)?;

        Ok(Self {
            path,
            lock,
            map,
            header,
            slots,
        })
    }

    #[must_use]
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.slots.get(key).map(|slot| value_of(&self.map, slot))
    }

    #[must_use]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.slots.contains_key(key)
    }

    /// Live keys in byte order.
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.slots.keys().map(Vec::as_slice)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn header(&self) -> &StoreHeader {
        &self.header
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn lock_handle(&self) -> &FileLock {
        &self.lock
    }
}
