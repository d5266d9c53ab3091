//! A single cached value plus its lifecycle bookkeeping (spec.md §3,
//! `CacheEntry<V>`).

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Types storable in a [`crate::ResultCache`] must know how to estimate
/// their own heap footprint, per spec.md §4.7's size-estimation rule:
/// strings ~2 bytes/char, byte buffers exact length, everything else a
/// fixed default. The estimate is advisory; eviction correctness does not
/// depend on exactness.
pub trait EstimateSize {
    fn estimate_size(&self) -> usize;
}

/// Fixed default used for values with no cheaper estimate available.
pub const DEFAULT_SIZE_ESTIMATE: usize = 100;

impl EstimateSize for String {
    fn estimate_size(&self) -> usize {
        self.chars().count() * 2
    }
}

impl EstimateSize for Vec<u8> {
    fn estimate_size(&self) -> usize {
        self.len()
    }
}

/// `CommandInfo` is the cache's primary resident (spec.md §4.7 stores one
/// `CommandInfo` per `(session, command-id)`). Its own fields dominate the
/// estimate; everything else is the default.
impl EstimateSize for cdbg_core::CommandInfo {
    fn estimate_size(&self) -> usize {
        let strings = self.command_text.estimate_size()
            + self
                .aggregated_output
                .as_ref()
                .map(|s| s.estimate_size())
                .unwrap_or(0)
            + self
                .error_message
                .as_ref()
                .map(|s| s.estimate_size())
                .unwrap_or(0);
        strings + DEFAULT_SIZE_ESTIMATE
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: u64,
    pub size_bytes: usize,
    /// Monotone insertion sequence, used only as the final LRU eviction
    /// tiebreak.
    pub(crate) seq: u64,
}

impl<V: EstimateSize> CacheEntry<V> {
    pub fn new(value: V, ttl: Duration, seq: u64) -> Self {
        let now = Utc::now();
        let size_bytes = value.estimate_size();
        Self {
            value,
            created_at: now,
            last_accessed: now,
            expires_at: now + chrono_duration(ttl),
            access_count: 0,
            size_bytes,
            seq,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
        self.access_count += 1;
    }
}

fn chrono_duration(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero())
}
