//! In-process (L1) tier backed by moka.
//!
//! - Bounded by entry count, or by key+value bytes when a byte budget is set
//! - Least-recently-used eviction
//! - Per-entry TTL; an expired entry is never returned
//!
//! moka applies evictions and expirations during its own maintenance, so the
//! entry count may briefly exceed the bound between maintenance runs.
//! [`MemoryTier::clear_expired`] forces maintenance.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use time::OffsetDateTime;

use super::{CacheValue, MAX_TTL};
use super::stats::TierStats;

/// A value held by the memory tier.
#[derive(Clone, Debug)]
pub struct MemoryEntry {
    pub value: CacheValue,
    pub stored_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    ttl: Duration,
}

impl MemoryEntry {
    fn new(value: CacheValue, ttl: Duration) -> Self {
        let stored_at = OffsetDateTime::now_utc();
        Self {
            value,
            stored_at,
            expires_at: stored_at + ttl,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Bytes charged against the byte budget.
    fn weight(key: &str, entry: &MemoryEntry) -> u32 {
        u32::try_from(key.len() + entry.value.len()).unwrap_or(u32::MAX)
    }
}

/// Expires each entry after its own TTL, counted from its latest write.
struct PerEntryTtl;

impl Expiry<String, MemoryEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &MemoryEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &MemoryEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Capacity bound for the memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryCapacity {
    /// At most this many entries.
    Entries(u64),
    /// At most this many key + value bytes.
    Bytes(u64),
}

/// Bounded in-process key/value store with per-entry TTL.
pub struct MemoryTier {
    cache: Cache<String, MemoryEntry>,
    stats: Arc<TierStats>,
}

impl MemoryTier {
    /// Create a new memory tier.
    pub fn new(capacity: MemoryCapacity, stats: Arc<TierStats>) -> Self {
        let listener_stats = Arc::clone(&stats);
        let builder = Cache::builder()
            .name("voyage-memory-tier")
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(PerEntryTtl)
            .eviction_listener(move |_key, _value, cause: RemovalCause| {
                if cause.was_evicted() {
                    listener_stats.record_eviction();
                }
            });

        let cache = match capacity {
            MemoryCapacity::Entries(max) => builder.max_capacity(max).build(),
            MemoryCapacity::Bytes(max) => builder
                .weigher(|key: &String, entry: &MemoryEntry| MemoryEntry::weight(key, entry))
                .max_capacity(max)
                .build(),
        };

        Self { cache, stats }
    }

    /// Get a live value, recording a hit or a miss.
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        match self.cache.get(key) {
            Some(entry) => {
                tracing::debug!(key = %key, "cache hit (memory)");
                self.stats.record_hit();
                Some(entry.value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Get a live value without touching the counters.
    pub(crate) fn peek(&self, key: &str) -> Option<CacheValue> {
        self.cache.get(key).map(|entry| entry.value)
    }

    /// Inspect a live entry (value plus timestamps) without touching the counters.
    pub fn entry(&self, key: &str) -> Option<MemoryEntry> {
        self.cache.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    /// Store a value for `ttl`, capped at [`MAX_TTL`]. A zero TTL stores nothing.
    pub fn set(&self, key: &str, value: CacheValue, ttl: Duration) {
        if ttl.is_zero() {
            self.cache.invalidate(key);
            return;
        }
        self.cache
            .insert(key.to_string(), MemoryEntry::new(value, ttl.min(MAX_TTL)));
        self.stats.record_set();
    }

    /// Remove a key. Returns whether a live entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.cache.remove(key).is_some();
        self.stats.record_delete();
        removed
    }

    /// Run pending maintenance: drop expired entries and apply evictions.
    pub fn clear_expired(&self) {
        self.cache.run_pending_tasks();
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }

    /// Approximate number of entries (exact right after [`Self::clear_expired`]).
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn stats(&self) -> &Arc<TierStats> {
        &self.stats
    }
}
