use crate::error::Pressure;

use super::SkippedRecord;

/// Operator-facing progress hooks. Purely observational: nothing the observer
/// does affects the load.
pub trait LoadObserver {
    /// A store generation was opened and the manifest restarts from the top.
    fn on_generation(&mut self, _generation: u64, _capacity: u64) {}

    /// `processed` increases monotonically across the whole run, including replays.
    fn on_record(&mut self, _processed: u64, _key: &str) {}

    /// A batch was committed; `committed` counts records in the current generation.
    fn on_commit(&mut self, _committed: usize) {}

    fn on_skip(&mut self, _record: &SkippedRecord) {}

    fn on_growth(&mut self, _from: u64, _to: u64, _pressure: Pressure) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl LoadObserver for NoopObserver {}
