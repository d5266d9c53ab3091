//! Reported cache statistics (spec.md §4.7 / §9 Open Question #3: the
//! richer shape with hit/miss/eviction/expiration counters).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheStatistics {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub total_size_bytes: usize,
    pub total_accesses: u64,
    pub average_access_count: f64,
    pub memory_usage_percent: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStatistics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
