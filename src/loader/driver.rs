//! The load state machine.
//!
//! ```text
//! Sizing -> Loading --(batch boundary: commit, continue)--> Loading
//!              |--(exhausted / out of memory)--> Growing -> Loading (manifest restarts at 0)
//!              |--(manifest consumed, index written, synced)--> Success
//!              `--(any other store error)--> Fatal
//! ```
//!
//! Restarting from the top is safe because puts overwrite by key and the store
//! treats an identical rewrite as a no-op.

use std::path::Path;
use std::time::Instant;

use crate::config::LoaderConfig;
use crate::error::{LoadError, Pressure, Result, StoreError, StoreResult};
use crate::index::KeyIndex;
use crate::manifest::{Manifest, ManifestEntry};
use crate::store::{Environment, Store, Transaction};

use super::policy::{GrowthDecision, GrowthPolicy};
use super::{LoadObserver, LoadReport, SkippedRecord};

#[derive(Debug)]
enum LoadState {
    Sizing,
    Loading { capacity: u64 },
    Growing { capacity: u64, pressure: Pressure },
    Success(LoadReport),
    Fatal(LoadError),
}

/// Records written by one generation before it either finished or hit pressure.
#[derive(Debug, Default)]
struct GenerationLog {
    keys: Vec<String>,
    skipped: Vec<SkippedRecord>,
}

pub(super) struct Driver<'a, E: Environment> {
    env: &'a E,
    config: &'a LoaderConfig,
    manifest: &'a Manifest,
    path: &'a Path,
    observer: &'a mut dyn LoadObserver,
    policy: GrowthPolicy,
    generations: u64,
    /// Records committed by the current generation.
    committed: usize,
    /// Highest batch boundary committed by any generation. Replays only
    /// overwrite, so records below it stay in the store whatever happens next.
    durable: usize,
    processed: u64,
    commits: u64,
    started: Instant,
}

impl<'a, E: Environment> Driver<'a, E> {
    pub(super) fn new(
        env: &'a E,
        config: &'a LoaderConfig,
        manifest: &'a Manifest,
        path: &'a Path,
        observer: &'a mut dyn LoadObserver,
    ) -> Self {
        Self {
            env,
            config,
            manifest,
            path,
            observer,
            policy: GrowthPolicy::new(config),
            generations: 0,
            committed: 0,
            durable: 0,
            processed: 0,
            commits: 0,
            started: Instant::now(),
        }
    }

    pub(super) fn run(mut self) -> Result<LoadReport> {
        let mut state = LoadState::Sizing;
        loop {
            state = match state {
                LoadState::Sizing => LoadState::Loading {
                    capacity: self.initial_capacity(),
                },
                LoadState::Loading { capacity } => self.load_generation(capacity),
                LoadState::Growing { capacity, pressure } => self.grow(capacity, pressure),
                LoadState::Success(report) => {
                    tracing::info!(
                        load.records = report.keys.len(),
                        load.skipped = report.skipped.len(),
                        load.generations = report.generations,
                        store.capacity = report.reserved_capacity,
                        load.elapsed_ms = report.elapsed.as_millis() as u64,
                        "load complete"
                    );
                    return Ok(report);
                }
                LoadState::Fatal(err) => {
                    tracing::error!(
                        load.generation = self.generations,
                        load.committed = self.durable,
                        error = %err,
                        "load aborted; key index not written"
                    );
                    return Err(err);
                }
            };
        }
    }

    fn initial_capacity(&self) -> u64 {
        let capacity = if let Some(explicit) = self.config.initial_capacity {
            explicit
        } else {
            let estimate = self.manifest.existing_payload_bytes();
            tracing::info!(
                manifest.entries = self.manifest.len(),
                manifest.payload_bytes = estimate,
                "sized manifest payload"
            );
            if estimate == 0 {
                self.config.initial_capacity_floor
            } else {
                estimate
            }
        };
        self.config
            .max_capacity
            .map_or(capacity, |max| capacity.min(max))
    }

    fn grow(&mut self, capacity: u64, pressure: Pressure) -> LoadState {
        match self.policy.next_capacity(pressure, capacity) {
            GrowthDecision::Retry(next) => {
                tracing::info!(
                    load.generation = self.generations,
                    store.capacity = capacity,
                    store.next_capacity = next,
                    pressure = ?pressure,
                    "resizing store and restarting manifest"
                );
                self.observer.on_growth(capacity, next, pressure);
                LoadState::Loading { capacity: next }
            }
            GrowthDecision::Unsatisfiable { capacity } => {
                LoadState::Fatal(LoadError::CapacityUnsatisfiable {
                    capacity,
                    floor: self.policy.shrink_floor(),
                    committed: self.durable,
                })
            }
        }
    }

    fn load_generation(&mut self, capacity: u64) -> LoadState {
        self.generations += 1;
        let mut store = match self.env.open(self.path, capacity) {
            Ok(store) => store,
            Err(err) => return self.classify(err, capacity),
        };
        self.committed = 0;
        let reserved = store.reserved_capacity();
        tracing::info!(
            load.generation = self.generations,
            store.generation = store.generation(),
            store.capacity = reserved,
            "store opened"
        );
        self.observer.on_generation(self.generations, reserved);

        let mut log = GenerationLog::default();
        if let Err(err) = self.write_records(&mut store, &mut log) {
            return self.classify(err, reserved);
        }

        let encoded = match KeyIndex::new(log.keys.clone()).encode() {
            Ok(bytes) => bytes,
            Err(err) => return LoadState::Fatal(err),
        };
        let finished = KeyIndex::write_encoded(&mut store, &self.config.index_key, &encoded)
            .and_then(|()| store.sync());
        if let Err(err) = finished {
            return self.classify(err, reserved);
        }
        self.commits += 1;

        LoadState::Success(LoadReport {
            keys: log.keys,
            skipped: log.skipped,
            generations: self.generations,
            reserved_capacity: reserved,
            store_generation: store.generation(),
            processed: self.processed,
            commits: self.commits,
            elapsed: self.started.elapsed(),
        })
    }

    /// Stream the whole manifest through batches of `batch_size` successful puts.
    fn write_records<S: Store>(&mut self, store: &mut S, log: &mut GenerationLog) -> StoreResult<()> {
        self.clear_stale_index(store)?;

        let manifest = self.manifest;
        let batch_size = self.config.batch_size;
        let mut remaining = manifest.iter();
        let mut exhausted = false;
        while !exhausted {
            let mut txn = store.begin_write()?;
            let mut batch = Vec::with_capacity(batch_size);
            while batch.len() < batch_size {
                let Some(entry) = remaining.next() else {
                    exhausted = true;
                    break;
                };
                let payload = match fs_err::read(&entry.source_path) {
                    Ok(payload) => payload,
                    Err(source) => {
                        self.skip(entry, source, log);
                        continue;
                    }
                };
                if let Err(err) = txn.put(entry.key.as_bytes(), &payload) {
                    txn.abort();
                    if err.pressure().is_some() {
                        tracing::warn!(
                            load.generation = self.generations,
                            load.committed = self.committed,
                            record.key = %entry.key,
                            error = %err,
                            "discarding in-flight batch"
                        );
                    }
                    return Err(err);
                }
                batch.push(entry.key.clone());
                self.processed += 1;
                self.observer.on_record(self.processed, &entry.key);
            }

            let written = batch.len();
            if written == 0 {
                txn.abort();
                continue;
            }
            txn.commit()?;
            self.commits += 1;
            self.committed += written;
            self.durable = self.durable.max(self.committed);
            log.keys.extend(batch);
            tracing::debug!(
                load.generation = self.generations,
                load.committed = self.committed,
                "batch committed"
            );
            self.observer.on_commit(self.committed);
        }
        Ok(())
    }

    /// Remove an index left by an earlier run so a failure now leaves none behind.
    fn clear_stale_index<S: Store>(&mut self, store: &mut S) -> StoreResult<()> {
        let mut txn = store.begin_write()?;
        if txn.delete(self.config.index_key.as_bytes())? {
            txn.commit()?;
            self.commits += 1;
            tracing::info!(index.key = %self.config.index_key, "removed stale key index");
        } else {
            txn.abort();
        }
        Ok(())
    }

    fn skip(&mut self, entry: &ManifestEntry, source: std::io::Error, log: &mut GenerationLog) {
        let err = LoadError::SourceRead {
            key: entry.key.clone(),
            path: entry.source_path.clone(),
            source,
        };
        let record = SkippedRecord {
            key: entry.key.clone(),
            path: entry.source_path.clone(),
            line: entry.line,
            reason: err.to_string(),
        };
        log.skipped.push(record);
        tracing::warn!(
            record.key = %entry.key,
            record.path = %entry.source_path.display(),
            load.failures = log.skipped.len(),
            error = %err,
            "skipping unreadable source"
        );
        if let Some(record) = log.skipped.last() {
            self.observer.on_skip(record);
        }
    }

    fn classify(&self, err: StoreError, capacity: u64) -> LoadState {
        match err.pressure() {
            Some(pressure) => LoadState::Growing { capacity, pressure },
            None => LoadState::Fatal(LoadError::Store {
                committed: self.durable,
                source: err,
            }),
        }
    }
}
