//! Result cache: maps a `(session, command-id)` key (or any `Eq + Hash`
//! key) to a value with TTL expiry and memory-pressure LRU eviction.

mod cache;
mod entry;
mod stats;

pub use cache::ResultCache;
pub use entry::{CacheEntry, EstimateSize, DEFAULT_SIZE_ESTIMATE};
pub use stats::CacheStatistics;
