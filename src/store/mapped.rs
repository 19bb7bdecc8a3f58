//! Memory-mapped, append-only implementation of the store traits.
//!
//! Responsibilities:
//! - Take the exclusive OS lock on the data file so a second writer fails fast.
//! - Reserve the requested capacity by growing the file and mapping it once.
//! - Recover the committed record log into an in-memory key map on open.
//! - Publish commits by advancing the committed end in the header page.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use super::{Environment, Store, Transaction};
use crate::constants::{DATA_FILE_NAME, HEADER_SIZE, RECORD_HEADER_SIZE};
use crate::error::{StoreError, StoreResult};
use crate::io::header::{HeaderCodec, StoreHeader};
use crate::io::log::{self, RecordKind};
use crate::lock::{FileLock, LockMode};

/// Location of a live value inside the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    pub value_offset: u64,
    pub len: u64,
    pub checksum: [u8; 32],
}

pub(crate) type SlotMap = BTreeMap<Vec<u8>, Slot>;

/// Replay the committed log into the live key map. Later records win.
pub(crate) fn build_index(bytes: &[u8], committed_end: u64) -> StoreResult<SlotMap> {
    let mut slots = SlotMap::new();
    for record in log::scan(bytes, HEADER_SIZE as u64, committed_end)? {
        match record.kind {
            RecordKind::Put => {
                slots.insert(
                    record.key,
                    Slot {
                        value_offset: record.value_offset,
                        len: record.value_len,
                        checksum: record.checksum,
                    },
                );
            }
            RecordKind::Tombstone => {
                slots.remove(&record.key);
            }
        }
    }
    Ok(slots)
}

pub(crate) fn value_of<'m>(bytes: &'m [u8], slot: &Slot) -> &'m [u8] {
    let start = slot.value_offset as usize;
    &bytes[start..start + slot.len as usize]
}

/// Opens [`MappedStore`] handles.
#[derive(Debug, Clone, Copy, Default)]
pub struct MappedEnvironment;

impl Environment for MappedEnvironment {
    type Store = MappedStore;

    fn open(&self, path: &Path, capacity: u64) -> StoreResult<MappedStore> {
        MappedStore::open(path, capacity)
    }
}

/// Exclusive writable handle on a store directory.
///
/// The data file is mapped once at open with a fixed length; writes past that
/// length fail with [`StoreError::CapacityExhausted`] and the only remedy is to
/// drop the handle and reopen with a larger capacity.
#[derive(Debug)]
pub struct MappedStore {
    path: PathBuf,
    file: File,
    lock: FileLock,
    map: MmapMut,
    header: StoreHeader,
    slots: SlotMap,
}

impl MappedStore {
    pub fn open<P: AsRef<Path>>(dir: P, capacity: u64) -> StoreResult<Self> {
        let dir = dir.as_ref();
        fs_err::create_dir_all(dir)?;
        let path = dir.join(DATA_FILE_NAME);
        let (mut file, _) = fs_err::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?
            .into_parts();
        let lock = FileLock::try_acquire(&file, &path, LockMode::Exclusive)?;

        let file_len = file.metadata()?.len();
        let previous = if file_len == 0 {
            None
        } else {
            Some(read_header(&mut file)?)
        };
        let committed_end = previous.map_or(HEADER_SIZE as u64, |header| header.committed_end);
        if committed_end > file_len && previous.is_some() {
            return Err(StoreError::Corrupt {
                offset: committed_end,
                reason: format!("committed end past end of file ({file_len} bytes)"),
            });
        }

        // Never map less than what is already committed.
        let reserved = capacity.max(committed_end + RECORD_HEADER_SIZE as u64);
        if file_len < reserved {
            file.set_len(reserved)?;
        }
        let mut map = map_writable(&file, reserved)?;
        let slots = build_index(&map, committed_end)?;

        let mut header = previous.unwrap_or_else(|| StoreHeader::fresh(reserved));
        if previous.is_some_and(|prev| prev.reserved_capacity != reserved) {
            header.generation += 1;
        }
        header.reserved_capacity = reserved;
        HeaderCodec::encode_into(&header, &mut map[..HEADER_SIZE])?;
        map.flush_range(0, HEADER_SIZE)?;

        tracing::debug!(
            store.path = %path.display(),
            store.capacity = reserved,
            store.generation = header.generation,
            store.committed_end = header.committed_end,
            store.records = slots.len(),
            "store opened"
        );

        Ok(Self {
            path,
            file,
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

    /// Number of live keys, including any loader metadata keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn header(&self) -> &StoreHeader {
        &self.header
    }

    /// Path of the data file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn lock_handle(&self) -> &FileLock {
        &self.lock
    }
}

impl Store for MappedStore {
    type Txn<'a>
        = WriteTxn<'a>
    where
        Self: 'a;

    fn begin_write(&mut self) -> StoreResult<WriteTxn<'_>> {
        let head = self.header.committed_end;
        Ok(WriteTxn {
            store: self,
            head,
            staged: BTreeMap::new(),
        })
    }

    fn reserved_capacity(&self) -> u64 {
        self.map.len() as u64
    }

    fn generation(&self) -> u64 {
        self.header.generation
    }

    fn sync(&mut self) -> StoreResult<()> {
        self.map.flush()?;
        self.file.sync_all()?;
        tracing::debug!(store.path = %self.path.display(), "store synced");
        Ok(())
    }
}

/// Write transaction over a [`MappedStore`]. Dropping it without commit discards it.
#[derive(Debug)]
pub struct WriteTxn<'a> {
    store: &'a mut MappedStore,
    head: u64,
    /// `None` marks a key deleted in this transaction.
    staged: BTreeMap<Vec<u8>, Option<Slot>>,
}

impl WriteTxn<'_> {
    fn current(&self, key: &[u8]) -> Option<Slot> {
        match self.staged.get(key) {
            Some(staged) => *staged,
            None => self.store.slots.get(key).copied(),
        }
    }

    fn append(
        &mut self,
        kind: RecordKind,
        key: &[u8],
        value: &[u8],
        digest: &[u8; 32],
    ) -> StoreResult<u64> {
        let size = log::entry_size(key.len(), value.len())?;
        let capacity = self.store.reserved_capacity();
        let end = match self.head.checked_add(size) {
            Some(end) if end <= capacity => end,
            _ => {
                return Err(StoreError::CapacityExhausted {
                    required: self.head.saturating_add(size),
                    capacity,
                });
            }
        };
        let start = self.head;
        log::encode_record(
            &mut self.store.map[start as usize..end as usize],
            kind,
            key,
            value,
            digest,
        );
        self.head = end;
        Ok(start + RECORD_HEADER_SIZE as u64 + key.len() as u64)
    }
}

impl Transaction for WriteTxn<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        let digest = log::checksum(key, value);
        // Rewriting identical bytes is a no-op, so replays cost no capacity.
        if self
            .current(key)
            .is_some_and(|slot| slot.len == value.len() as u64 && slot.checksum == digest)
        {
            return Ok(());
        }
        let value_offset = self.append(RecordKind::Put, key, value, &digest)?;
        self.staged.insert(
            key.to_vec(),
            Some(Slot {
                value_offset,
                len: value.len() as u64,
                checksum: digest,
            }),
        );
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> StoreResult<bool> {
        if self.current(key).is_none() {
            return Ok(false);
        }
        let digest = log::checksum(key, &[]);
        self.append(RecordKind::Tombstone, key, &[], &digest)?;
        self.staged.insert(key.to_vec(), None);
        Ok(true)
    }

    fn commit(self) -> StoreResult<()> {
        let WriteTxn {
            store,
            head,
            staged,
        } = self;
        let start = store.header.committed_end;
        if head == start {
            return Ok(());
        }

        store
            .map
            .flush_range(start as usize, (head - start) as usize)?;
        let mut header = store.header;
        header.committed_end = head;
        header.sequence += 1;
        HeaderCodec::encode_into(&header, &mut store.map[..HEADER_SIZE])?;
        store.map.flush_range(0, HEADER_SIZE)?;
        store.header = header;

        for (key, slot) in staged {
            match slot {
                Some(slot) => {
                    store.slots.insert(key, slot);
                }
                None => {
                    store.slots.remove(&key);
                }
            }
        }
        tracing::debug!(
            store.sequence = header.sequence,
            store.committed_end = head,
            store.batch_bytes = head - start,
            "transaction committed"
        );
        Ok(())
    }

    fn abort(self) {
        tracing::debug!(
            store.discarded_bytes = self.head - self.store.header.committed_end,
            store.discarded_keys = self.staged.len(),
            "transaction aborted"
        );
    }
}

fn read_header(file: &mut File) -> StoreResult<StoreHeader> {
    let mut page = vec![0u8; HEADER_SIZE];
    file.read_exact(&mut page).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => StoreError::InvalidHeader {
            reason: "data file shorter than header page".into(),
        },
        _ => err.into(),
    })?;
    HeaderCodec::decode(&page)
}

fn map_writable(file: &File, len: u64) -> StoreResult<MmapMut> {
    let map_len =
        usize::try_from(len).map_err(|_| StoreError::OutOfMemory { capacity: len })?;
    // SAFETY: the data file is exclusively locked for the lifetime of the map, so
    // no cooperating process truncates or rewrites it underneath us.
    let map = unsafe { MmapOptions::new().len(map_len).map_mut(file) };
    map.map_err(|err| match err.kind() {
        io::ErrorKind::OutOfMemory => StoreError::OutOfMemory { capacity: len },
        _ => err.into(),
    })
}
