//! Capacity growth policy.
//!
//! Exhaustion doubles the reserved capacity; memory pressure halves the capacity
//! that could not be reserved and remembers it as a ceiling. Once a ceiling is
//! known, exhaustion bisects towards it instead of doubling past it, so
//! alternating pressure converges instead of oscillating.

use crate::config::LoaderConfig;
use crate::error::Pressure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthDecision {
    /// Reopen the store with this capacity and replay the manifest.
    Retry(u64),
    /// No capacity can be tried any more.
    Unsatisfiable { capacity: u64 },
}

#[derive(Debug, Clone)]
pub struct GrowthPolicy {
    shrink_floor: u64,
    max_capacity: Option<u64>,
    ceiling: Option<u64>,
}

impl GrowthPolicy {
    #[must_use]
    pub fn new(config: &LoaderConfig) -> Self {
        Self {
            shrink_floor: config.shrink_floor,
            max_capacity: config.max_capacity,
            ceiling: None,
        }
    }

    #[must_use]
    pub fn shrink_floor(&self) -> u64 {
        self.shrink_floor
    }

    /// Smallest capacity known to fail with memory pressure, if any.
    #[must_use]
    pub fn ceiling(&self) -> Option<u64> {
        self.ceiling
    }

    /// Decide the next capacity after `pressure` was observed at `current`.
    pub fn next_capacity(&mut self, pressure: Pressure, current: u64) -> GrowthDecision {
        match pressure {
            Pressure::OutOfMemory => self.shrink(current),
            Pressure::CapacityExhausted => self.grow(current),
        }
    }

    fn shrink(&mut self, current: u64) -> GrowthDecision {
        self.ceiling = Some(self.ceiling.map_or(current, |ceiling| ceiling.min(current)));
        let halved = current / 2;
        if halved < self.shrink_floor {
            GrowthDecision::Unsatisfiable { capacity: halved }
        } else {
            GrowthDecision::Retry(halved)
        }
    }

    fn grow(&self, current: u64) -> GrowthDecision {
        let doubled = current.checked_mul(2);
        let mut next = match (doubled, self.max_capacity) {
            (Some(doubled), Some(max)) => doubled.min(max),
            (None, Some(max)) => max,
            (Some(doubled), None) => doubled,
            (None, None) => return GrowthDecision::Unsatisfiable { capacity: current },
        };

        if let Some(ceiling) = self.ceiling.filter(|ceiling| next >= *ceiling) {
            let step = ceiling.saturating_sub(current) / 2;
            if step < self.shrink_floor {
                return GrowthDecision::Unsatisfiable { capacity: current };
            }
            next = current + step;
        }

        if next <= current {
            GrowthDecision::Unsatisfiable { capacity: current }
        } else {
            GrowthDecision::Retry(next)
        }
    }
}
