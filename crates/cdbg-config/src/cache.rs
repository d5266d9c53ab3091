//! Result cache configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfiguration {
    pub max_memory_bytes: u64,
    #[serde(rename = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(rename = "cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// In `0.0..=1.0`. Eviction triggers when `used / max >= threshold`.
    pub memory_pressure_threshold: f64,
    pub max_entries_per_cleanup: usize,
}

impl Default for CacheConfiguration {
    fn default() -> Self {
        Self {
            max_memory_bytes: 64 * 1024 * 1024,
            default_ttl_secs: 300,
            cleanup_interval_secs: 60,
            memory_pressure_threshold: 0.8,
            max_entries_per_cleanup: 500,
        }
    }
}

impl CacheConfiguration {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}
