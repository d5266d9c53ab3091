//! Batch processor configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfiguration {
    pub enabled: bool,
    pub max_batch_size: usize,
    #[serde(rename = "batch_wait_timeout_ms")]
    pub batch_wait_timeout_ms: u64,
    pub batch_timeout_multiplier: f64,
    #[serde(rename = "max_batch_timeout_ms")]
    pub max_batch_timeout_ms: u64,
    /// Command-prefix strings; a command matching any entry by prefix is
    /// never batched.
    pub excluded_commands: HashSet<String>,
}

impl Default for BatchingConfiguration {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: 10,
            batch_wait_timeout_ms: 50,
            batch_timeout_multiplier: 1.5,
            max_batch_timeout_ms: 30_000,
            excluded_commands: ["!analyze"].into_iter().map(String::from).collect(),
        }
    }
}

impl BatchingConfiguration {
    pub fn batch_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_wait_timeout_ms)
    }

    pub fn max_batch_timeout(&self) -> Duration {
        Duration::from_millis(self.max_batch_timeout_ms)
    }

    /// Batching is effectively off when disabled or either knob is
    /// non-positive.
    pub fn is_active(&self) -> bool {
        self.enabled && self.max_batch_size > 0 && self.batch_wait_timeout_ms > 0
    }

    pub fn is_excluded(&self, command_text: &str) -> bool {
        self.excluded_commands
            .iter()
            .any(|prefix| command_text.starts_with(prefix.as_str()))
    }
}
