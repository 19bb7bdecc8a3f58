//! Capacity-adaptive bulk loader.

mod driver;
mod policy;
mod progress;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::LoaderConfig;
use crate::constants::LOAD_LOCK_FILE_NAME;
use crate::error::{LoadError, Result};
use crate::lock::FileLock;
use crate::manifest::Manifest;
use crate::store::{Environment, MappedEnvironment};

pub use policy::{GrowthDecision, GrowthPolicy};
pub use progress::{LoadObserver, NoopObserver};

/// A manifest entry whose source could not be read during the final generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub key: String,
    pub path: PathBuf,
    pub line: usize,
    pub reason: String,
}

/// Outcome of a successful load.
#[derive(Debug, Clone)]
pub struct LoadReport {
    /// Keys written, in put order. Identical to the persisted key index.
    pub keys: Vec<String>,
    pub skipped: Vec<SkippedRecord>,
    /// Number of store generations opened, including the successful one.
    pub generations: u64,
    /// Reserved capacity of the store that completed the load.
    pub reserved_capacity: u64,
    /// Generation counter reported by the store itself.
    pub store_generation: u64,
    /// Records processed across every generation, replays included.
    pub processed: u64,
    pub commits: u64,
    pub elapsed: Duration,
}

impl LoadReport {
    #[must_use]
    pub fn records_loaded(&self) -> usize {
        self.keys.len()
    }
}

/// Drives a manifest into a store, growing the store's reserved capacity on demand.
#[derive(Debug, Clone)]
pub struct BulkLoader<E: Environment = MappedEnvironment> {
    env: E,
    config: LoaderConfig,
}

impl BulkLoader<MappedEnvironment> {
    #[must_use]
    pub fn new(config: LoaderConfig) -> Self {
        Self::with_environment(MappedEnvironment, config)
    }
}

impl<E: Environment> BulkLoader<E> {
    #[must_use]
    pub fn with_environment(env: E, config: LoaderConfig) -> Self {
        Self { env, config }
    }

    #[must_use]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    #[must_use]
    pub fn environment(&self) -> &E {
        &self.env
    }

    /// Parse `manifest_path` and load it into the store at `store_path`.
    pub fn load_file(
        &self,
        manifest_path: &Path,
        store_path: &Path,
        observer: &mut dyn LoadObserver,
    ) -> Result<LoadReport> {
        let manifest = Manifest::from_path(manifest_path)?;
        self.load(&manifest, store_path, observer)
    }

    /// Load every entry of `manifest` into the store at `store_path`.
    ///
    /// On success the store holds every readable record plus the key index.
    /// On error the store holds whatever batches were committed and no index.
    pub fn load(
        &self,
        manifest: &Manifest,
        store_path: &Path,
        observer: &mut dyn LoadObserver,
    ) -> Result<LoadReport> {
        self.config.validate()?;
        manifest.ensure_key_not_reserved(&self.config.index_key)?;

        fs_err::create_dir_all(store_path)?;
        // Held across every reopen so a second loader cannot slip in between generations.
        let _run_lock = FileLock::open_exclusive(&store_path.join(LOAD_LOCK_FILE_NAME))
            .map_err(|source| LoadError::Store {
                committed: 0,
                source,
            })?;

        driver::Driver::new(&self.env, &self.config, manifest, store_path, observer).run()
    }
}
