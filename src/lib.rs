#![deny(clippy::all, clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![cfg_attr(
    test,
    allow(
        clippy::uninlined_format_args,
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss
    )
)]
#![allow(clippy::module_name_repetitions)]
//
// Strategic lint exceptions - these are allowed project-wide for pragmatic reasons:
//
// Documentation lints: internal helpers are self-describing; public APIs still carry docs.
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
//
// Cast safety: offsets and lengths are bounded by the reserved capacity, which is
// itself bounded by the address space we managed to map.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_lossless)]
//
// Pattern matching and builder ergonomics.
#![allow(clippy::manual_let_else)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::len_without_is_empty)]

//! Capacity-adaptive bulk loading of keyed binary payloads into a single
//! memory-mapped record store.
//!
//! The loader reads a manifest of `key source_path` lines, streams each source
//! file into a transactional store whose reserved address range is fixed at open
//! time, and grows that range on demand. Once every record is committed, an
//! ordered key index is written under a sentinel key; its presence marks a
//! complete load.

/// The audiopack crate version (matches `Cargo.toml`).
pub const AUDIOPACK_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod config;
pub mod constants;
pub mod error;
pub mod index;
pub mod io;
mod lock;
pub mod loader;
pub mod manifest;
pub mod store;

pub use config::LoaderConfig;
pub use constants::*;
pub use error::{LoadError, Pressure, Result, StoreError, StoreResult};
pub use index::KeyIndex;
pub use lock::{FileLock, LockMode};
pub use loader::{
    BulkLoader, GrowthDecision, GrowthPolicy, LoadObserver, LoadReport, NoopObserver,
    SkippedRecord,
};
pub use manifest::{Manifest, ManifestEntry};
pub use store::{Environment, MappedEnvironment, MappedStore, Store, StoreReader, Transaction};
