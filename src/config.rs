//! Loader configuration passed explicitly into the driver.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_INDEX_KEY, DEFAULT_INITIAL_CAPACITY_FLOOR, DEFAULT_SHRINK_FLOOR,
};
use crate::error::{LoadError, Result};

/// Tunables for a bulk load. Every field has a default, so a JSON config file
/// only needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Records put per transaction before a forced commit.
    pub batch_size: usize,
    /// Explicit first capacity. When unset, capacity is sized from the manifest.
    pub initial_capacity: Option<u64>,
    /// Seed capacity used when the manifest sizes to zero bytes.
    pub initial_capacity_floor: u64,
    /// Memory-pressure shrinking gives up below this capacity.
    pub shrink_floor: u64,
    /// Upper bound on reserved capacity. `None` lets growth continue indefinitely.
    pub max_capacity: Option<u64>,
    /// Sentinel key holding the key index.
    pub index_key: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            initial_capacity: None,
            initial_capacity_floor: DEFAULT_INITIAL_CAPACITY_FLOOR,
            shrink_floor: DEFAULT_SHRINK_FLOOR,
            max_capacity: None,
            index_key: DEFAULT_INDEX_KEY.to_string(),
        }
    }
}

impl LoaderConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let bytes = fs_err::read(path)?;
        let config: Self = serde_json::from_slice(&bytes).map_err(|err| LoadError::Config {
            reason: format!("{}: {err}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let reason = if self.batch_size == 0 {
            "batch_size must be at least 1".to_string()
        } else if self.shrink_floor == 0 {
            "shrink_floor must be non-zero".to_string()
        } else if self.initial_capacity_floor == 0 {
            "initial_capacity_floor must be non-zero".to_string()
        } else if self.initial_capacity == Some(0) {
            "initial_capacity must be non-zero".to_string()
        } else if self.index_key.is_empty() {
            "index_key must not be empty".to_string()
        } else if self.index_key.chars().any(char::is_whitespace) {
            "index_key must not contain whitespace".to_string()
        } else if let Some(max) = self.max_capacity.filter(|max| *max < self.shrink_floor) {
            format!(
                "max_capacity {max} is below shrink_floor {}",
                self.shrink_floor
            )
        } else {
            return Ok(());
        };
        Err(LoadError::Config { reason })
    }

    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn initial_capacity(mut self, capacity: u64) -> Self {
        self.initial_capacity = Some(capacity);
        self
    }

    #[must_use]
    pub fn initial_capacity_floor(mut self, floor: u64) -> Self {
        self.initial_capacity_floor = floor;
        self
    }

    #[must_use]
    pub fn shrink_floor(mut self, floor: u64) -> Self {
        self.shrink_floor = floor;
        self
    }

    #[must_use]
    pub fn max_capacity(mut self, max: u64) -> Self {
        self.max_capacity = Some(max);
        self
    }

    #[must_use]
    pub fn index_key(mut self, key: impl Into<String>) -> Self {
        self.index_key = key.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{GIB, MIB};

    #[test]
    fn defaults_match_documented_values() {
        let config = LoaderConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.initial_capacity_floor, GIB);
        assert_eq!(config.shrink_floor, MIB);
        assert_eq!(config.max_capacity, None);
        assert_eq!(config.index_key, "__keys__");
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("loader.json");
        std::fs::write(&path, r#"{ "batch_size": 25, "max_capacity": 8589934592 }"#)
            .expect("write config");

        let config = LoaderConfig::from_json_file(&path).expect("load config");
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.max_capacity, Some(8 * GIB));
        assert_eq!(config.shrink_floor, MIB);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let cases = [
            LoaderConfig::default().batch_size(0),
            LoaderConfig::default().shrink_floor(0),
            LoaderConfig::default().index_key(""),
            LoaderConfig::default().index_key("two words"),
            LoaderConfig::default().max_capacity(MIB / 2),
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(LoadError::Config { .. })),
                "{config:?} should be rejected"
            );
        }
    }
}
