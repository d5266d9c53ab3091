//! `ResultCache<K, V>`: TTL-expiring, memory-bounded result cache.
//! Maps an arbitrary key (the core uses `(SessionId, CommandId)`) to
//! a value; shared across sessions behind an internal lock so callers never
//! need an external one.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use cdbg_config::CacheConfiguration;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::entry::{CacheEntry, EstimateSize};
use crate::stats::CacheStatistics;

struct Inner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    total_size: usize,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<K, V> Default for Inner<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            total_size: 0,
            next_seq: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }
}

/// A shared, cloneable result cache. Clones share the same underlying
/// storage (`Arc`-backed), mirroring how the Session Registry and each
/// session hand out a cache handle without any caller-side locking.
#[derive(Clone)]
pub struct ResultCache<K, V> {
    inner: Arc<Mutex<Inner<K, V>>>,
    config: CacheConfiguration,
}

impl<K, V> ResultCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: EstimateSize + Clone + Send + 'static,
{
    pub fn new(config: CacheConfiguration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            config,
        }
    }

    /// Returns the value for `key`, or `None` if absent or expired.
    /// Expired entries are removed as a side effect: a `get` on an expired
    /// entry returns absent and may synchronously remove it.
    pub async fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock().await;
        let now = Utc::now();

        let expired = matches!(guard.entries.get(key), Some(e) if e.is_expired_at(now));
        if expired {
            if let Some(entry) = guard.entries.remove(key) {
                guard.total_size = guard.total_size.saturating_sub(entry.size_bytes);
            }
            guard.misses += 1;
            guard.expirations += 1;
            return None;
        }

        match guard.entries.get_mut(key) {
            Some(entry) => {
                entry.touch();
                guard.hits += 1;
                Some(entry.value.clone())
            }
            None => {
                guard.misses += 1;
                None
            }
        }
    }

    /// Insert or overwrite `key`. Runs a memory-pressure eviction pass
    /// afterwards; `set` immediately followed by `get` may therefore find
    /// the just-inserted key evicted again under heavy pressure.
    pub async fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        let mut guard = self.inner.lock().await;

        if let Some(old) = guard.entries.remove(&key) {
            guard.total_size = guard.total_size.saturating_sub(old.size_bytes);
        }

        let seq = guard.next_seq;
        guard.next_seq += 1;
        let entry = CacheEntry::new(value, ttl, seq);
        guard.total_size += entry.size_bytes;
        guard.entries.insert(key, entry);

        evict_for_memory_pressure(&mut guard, &self.config);
    }

    pub async fn remove(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock().await;
        let entry = guard.entries.remove(key)?;
        guard.total_size = guard.total_size.saturating_sub(entry.size_bytes);
        Some(entry.value)
    }

    pub async fn clear(&self) {
        let mut guard = self.inner.lock().await;
        guard.entries.clear();
        guard.total_size = 0;
    }

    pub async fn stats(&self) -> CacheStatistics {
        let guard = self.inner.lock().await;
        let now = Utc::now();
        let total_entries = guard.entries.len();
        let expired_entries = guard
            .entries
            .values()
            .filter(|e| e.is_expired_at(now))
            .count();
        let total_accesses: u64 = guard.entries.values().map(|e| e.access_count).sum();
        let average_access_count = if total_entries == 0 {
            0.0
        } else {
            total_accesses as f64 / total_entries as f64
        };
        let memory_usage_percent = if self.config.max_memory_bytes == 0 {
            0.0
        } else {
            (guard.total_size as f64 / self.config.max_memory_bytes as f64) * 100.0
        };

        CacheStatistics {
            total_entries,
            expired_entries,
            total_size_bytes: guard.total_size,
            total_accesses,
            average_access_count,
            memory_usage_percent,
            hits: guard.hits,
            misses: guard.misses,
            evictions: guard.evictions,
            expirations: guard.expirations,
        }
    }

    /// Remove all expired entries, up to `max_entries_per_cleanup`, to
    /// bound sweep latency. Run by the
    /// periodic sweep task, but callable directly for tests.
    pub async fn sweep_expired(&self) -> usize {
        let mut guard = self.inner.lock().await;
        let now = Utc::now();
        let victims: Vec<K> = guard
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired_at(now))
            .take(self.config.max_entries_per_cleanup)
            .map(|(k, _)| k.clone())
            .collect();

        let count = victims.len();
        for key in victims {
            if let Some(entry) = guard.entries.remove(&key) {
                guard.total_size = guard.total_size.saturating_sub(entry.size_bytes);
                guard.expirations += 1;
            }
        }
        count
    }

    /// Spawn the periodic sweep task at `config.cleanup_interval()`. The
    /// returned handle may be dropped to stop the loop silently, or
    /// aborted explicitly.
    pub fn spawn_sweep_loop(&self) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        let interval = self.config.cleanup_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let swept = cache.sweep_expired().await;
                if swept > 0 {
                    debug!(swept, "cache sweep removed expired entries");
                }
            }
        })
    }
}

/// Evict least-recently-used entries until usage drops to 60%, triggered
/// when `used / max >= memory_pressure_threshold`.
fn evict_for_memory_pressure<K, V>(inner: &mut Inner<K, V>, config: &CacheConfiguration)
where
    K: Eq + Hash + Clone,
{
    if config.max_memory_bytes == 0 {
        return;
    }
    let usage = |used: usize| used as f64 / config.max_memory_bytes as f64;
    if usage(inner.total_size) < config.memory_pressure_threshold {
        return;
    }

    let mut victims: Vec<(K, i64, u64, u64, usize)> = inner
        .entries
        .iter()
        .map(|(k, e)| {
            (
                k.clone(),
                e.last_accessed.timestamp_nanos_opt().unwrap_or(0),
                e.access_count,
                e.seq,
                e.size_bytes,
            )
        })
        .collect();
    // Ascending last_accessed, then ascending access_count, then insertion order.
    victims.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)).then(a.3.cmp(&b.3)));

    for (key, _, _, _, size) in victims {
        if usage(inner.total_size) <= 0.6 {
            break;
        }
        inner.entries.remove(&key);
        inner.total_size = inner.total_size.saturating_sub(size);
        inner.evictions += 1;
    }
}
