use crate::constants::{FORMAT_VERSION, HEADER_SIZE, MAGIC};
use crate::error::{StoreError, StoreResult};

// Layout: [magic: 4][version: u16][pad: 2][committed_end: u64][sequence: u64]
//         [generation: u64][reserved_capacity: u64][checksum: 32 bytes]
const CHECKSUM_OFFSET: usize = 40;
const ENCODED_LEN: usize = CHECKSUM_OFFSET + 32;

/// Store header persisted in the first page of the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreHeader {
    pub magic: [u8; 4],
    pub version: u16,
    /// End of the last committed record. Bytes past it are invisible to readers.
    pub committed_end: u64,
    /// Number of commits published since the store was created.
    pub sequence: u64,
    /// Bumped whenever the store is reopened with a different reserved capacity.
    pub generation: u64,
    pub reserved_capacity: u64,
}

impl StoreHeader {
    #[must_use]
    pub fn fresh(reserved_capacity: u64) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            committed_end: HEADER_SIZE as u64,
            sequence: 0,
            generation: 0,
            reserved_capacity,
        }
    }
}

pub struct HeaderCodec;

impl HeaderCodec {
    /// Encode `header` into the start of `page`, zeroing the rest of the header page.
    pub fn encode_into(header: &StoreHeader, page: &mut [u8]) -> StoreResult<()> {
        if page.len() < HEADER_SIZE {
            return Err(StoreError::InvalidHeader {
                reason: format!("header page needs {HEADER_SIZE} bytes, got {}", page.len()),
            });
        }
        let page = &mut page[..HEADER_SIZE];
        page.fill(0);
        page[..4].copy_from_slice(&header.magic);
        page[4..6].copy_from_slice(&header.version.to_le_bytes());
        page[8..16].copy_from_slice(&header.committed_end.to_le_bytes());
        page[16..24].copy_from_slice(&header.sequence.to_le_bytes());
        page[24..32].copy_from_slice(&header.generation.to_le_bytes());
        page[32..40].copy_from_slice(&header.reserved_capacity.to_le_bytes());
        let digest = blake3::hash(&page[..CHECKSUM_OFFSET]);
        page[CHECKSUM_OFFSET..ENCODED_LEN].copy_from_slice(digest.as_bytes());
        Ok(())
    }

    #[must_use]
    pub fn encode(header: &StoreHeader) -> Vec<u8> {
        let mut page = vec![0u8; HEADER_SIZE];
        // The buffer is exactly one header page, so encoding cannot fail.
        let _ = Self::encode_into(header, &mut page);
        page
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<StoreHeader> {
        if bytes.len() < ENCODED_LEN {
            return Err(StoreError::InvalidHeader {
                reason: format!("truncated header ({} bytes)", bytes.len()),
            });
        }
        let magic: [u8; 4] = read_array(bytes, 0)?;
        if magic != MAGIC {
            return Err(StoreError::InvalidHeader {
                reason: format!("bad magic {magic:02x?}"),
            });
        }
        let expected = blake3::hash(&bytes[..CHECKSUM_OFFSET]);
        if expected.as_bytes() != &bytes[CHECKSUM_OFFSET..ENCODED_LEN] {
            return Err(StoreError::InvalidHeader {
                reason: "header checksum mismatch".into(),
            });
        }
        let version = u16::from_le_bytes(read_array(bytes, 4)?);
        if version != FORMAT_VERSION {
            return Err(StoreError::InvalidHeader {
                reason: format!("unsupported format version {version:#06x}"),
            });
        }
        let header = StoreHeader {
            magic,
            version,
            committed_end: u64::from_le_bytes(read_array(bytes, 8)?),
            sequence: u64::from_le_bytes(read_array(bytes, 16)?),
            generation: u64::from_le_bytes(read_array(bytes, 24)?),
            reserved_capacity: u64::from_le_bytes(read_array(bytes, 32)?),
        };
        if header.committed_end < HEADER_SIZE as u64 {
            return Err(StoreError::InvalidHeader {
                reason: format!("committed end {} inside header page", header.committed_end),
            });
        }
        Ok(header)
    }
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> StoreResult<[u8; N]> {
    bytes
        .get(offset..offset + N)
        .and_then(|slice| <[u8; N]>::try_from(slice).ok())
        .ok_or_else(|| StoreError::InvalidHeader {
            reason: format!("field at offset {offset} out of range"),
        })
}
