//! Format constants and loader defaults.

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

/// Magic bytes at the start of every data file.
pub const MAGIC: [u8; 4] = *b"APK1";
pub const FORMAT_VERSION: u16 = 0x0100;

/// The header occupies one page so the record log starts page-aligned.
pub const HEADER_SIZE: usize = 4096;

// Each record header: [kind: u8][pad: 3][key_len: u32][value_len: u64][checksum: 32 bytes]
pub const RECORD_HEADER_SIZE: usize = 48;

/// Largest key accepted by the store.
pub const MAX_KEY_BYTES: usize = 64 * 1024;

pub const DATA_FILE_NAME: &str = "data.apk";
pub const LOAD_LOCK_FILE_NAME: &str = "load.lock";

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_INITIAL_CAPACITY_FLOOR: u64 = GIB;
pub const DEFAULT_SHRINK_FLOOR: u64 = MIB;
pub const DEFAULT_INDEX_KEY: &str = "__keys__";

pub const KEY_INDEX_VERSION: u16 = 1;
