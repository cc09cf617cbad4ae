//! Tuning knobs for the cache and dispatch layer.

use std::fmt::{Display, Formatter};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Configuration for one rank's cache/dispatch stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Significant decimal digits kept when quantizing input fields into the
    /// cache key. 5 digits gives a relative tolerance of roughly 1e-4..1e-5.
    pub significant_digits: u8,
    /// Entry-count bound for the persistent store. `None` means unbounded;
    /// beyond the bound, least-recently-used entries are evicted.
    pub max_entries: Option<u64>,
    /// Upper bound on concurrent fine-grain solver invocations per batch.
    pub max_concurrent_solves: usize,
    /// Byte bound on caller-supplied tags.
    pub max_tag_len: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            significant_digits: 5,
            max_entries: None,
            max_concurrent_solves: 4,
            max_tag_len: 256,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=15).contains(&self.significant_digits) {
            return Err(ConfigError(format!(
                "significant_digits must be in 1..=15, got {}",
                self.significant_digits
            )));
        }
        if self.max_concurrent_solves == 0 {
            return Err(ConfigError(
                "max_concurrent_solves must be at least 1".to_string(),
            ));
        }
        if self.max_entries == Some(0) {
            return Err(ConfigError(
                "max_entries must be at least 1 when bounded".to_string(),
            ));
        }
        Ok(())
    }

    /// Load and validate a config from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("failed to read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| ConfigError(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug)]
pub struct ConfigError(pub String);

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConfigError: {}", self.0)
    }
}
impl std::error::Error for ConfigError {}
