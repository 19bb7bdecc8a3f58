//! Append-only record log stored after the header page.
//!
//! Records are laid out back to back with no padding. A record is only
//! meaningful when it lies entirely below the committed end published in the
//! header; anything after it belongs to an aborted or in-flight transaction.

use crate::constants::{MAX_KEY_BYTES, RECORD_HEADER_SIZE};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Put = 1,
    Tombstone = 2,
}

impl RecordKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Put),
            2 => Some(Self::Tombstone),
            _ => None,
        }
    }
}

/// A record located by [`scan`]. Offsets are absolute within the data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedRecord {
    pub offset: u64,
    pub kind: RecordKind,
    pub key: Vec<u8>,
    pub value_offset: u64,
    pub value_len: u64,
    pub checksum: [u8; 32],
}

#[must_use]
pub fn checksum(key: &[u8], value: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(key);
    hasher.update(value);
    hasher.finalize().into()
}

/// Total bytes a record occupies in the log.
pub fn entry_size(key_len: usize, value_len: usize) -> StoreResult<u64> {
    if key_len > MAX_KEY_BYTES {
        return Err(StoreError::KeyTooLarge {
            len: key_len,
            max: MAX_KEY_BYTES,
        });
    }
    (RECORD_HEADER_SIZE as u64)
        .checked_add(key_len as u64)
        .and_then(|size| size.checked_add(value_len as u64))
        .ok_or(StoreError::CapacityExhausted {
            required: u64::MAX,
            capacity: 0,
        })
}

/// Write one record into `buf`, which must be exactly [`entry_size`] bytes.
pub fn encode_record(
    buf: &mut [u8],
    kind: RecordKind,
    key: &[u8],
    value: &[u8],
    digest: &[u8; 32],
) {
    let key_end = RECORD_HEADER_SIZE + key.len();
    buf[0] = kind as u8;
    buf[1..4].fill(0);
    buf[4..8].copy_from_slice(&(key.len() as u32).to_le_bytes());
    buf[8..16].copy_from_slice(&(value.len() as u64).to_le_bytes());
    buf[16..48].copy_from_slice(digest);
    buf[RECORD_HEADER_SIZE..key_end].copy_from_slice(key);
    buf[key_end..key_end + value.len()].copy_from_slice(value);
}

/// Walk every record in `bytes[start..end]`, verifying checksums.
pub fn scan(bytes: &[u8], start: u64, end: u64) -> StoreResult<Vec<ScannedRecord>> {
    if end > bytes.len() as u64 || start > end {
        return Err(StoreError::Corrupt {
            offset: end,
            reason: format!("committed end past mapped length {}", bytes.len()),
        });
    }
    let mut records = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let header_end = cursor + RECORD_HEADER_SIZE as u64;
        if header_end > end {
            return Err(corrupt(cursor, "record header crosses committed end"));
        }
        let header = &bytes[cursor as usize..header_end as usize];
        let kind = RecordKind::from_byte(header[0])
            .ok_or_else(|| corrupt(cursor, "unknown record kind"))?;
        let key_len = u64::from(u32::from_le_bytes(
            header[4..8]
                .try_into()
                .map_err(|_| corrupt(cursor, "invalid key length header"))?,
        ));
        let value_len = u64::from_le_bytes(
            header[8..16]
                .try_into()
                .map_err(|_| corrupt(cursor, "invalid value length header"))?,
        );
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&header[16..48]);

        let record_end = header_end
            .checked_add(key_len)
            .and_then(|pos| pos.checked_add(value_len))
            .filter(|pos| *pos <= end);
        let Some(record_end) = record_end else {
            tracing::error!(
                log.offset = cursor,
                log.key_len = key_len,
                log.value_len = value_len,
                log.committed_end = end,
                "record length invalid"
            );
            return Err(corrupt(cursor, "record length invalid"));
        };

        let value_offset = header_end + key_len;
        let key = &bytes[header_end as usize..value_offset as usize];
        let value = &bytes[value_offset as usize..record_end as usize];
        if checksum(key, value) != digest {
            return Err(corrupt(cursor, "record checksum mismatch"));
        }

        records.push(ScannedRecord {
            offset: cursor,
            kind,
            key: key.to_vec(),
            value_offset,
            value_len,
            checksum: digest,
        });
        cursor = record_end;
    }
    Ok(records)
}

fn corrupt(offset: u64, reason: &str) -> StoreError {
    StoreError::Corrupt {
        offset,
        reason: reason.into(),
    }
}
