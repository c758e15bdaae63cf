//! Per-tier counters and point-in-time snapshots.
//!
//! All counters are relaxed atomics: recording never blocks a cache operation
//! and a snapshot never blocks a recorder. A snapshot is therefore only
//! approximately consistent across fields, which is fine for monitoring.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::metrics;

/// Tier label for the in-process tier.
pub const MEMORY_TIER: &str = "memory";
/// Tier label for the shared remote tier.
pub const REMOTE_TIER: &str = "remote";

/// Running counters for one tier since process start.
#[derive(Debug)]
pub struct TierStats {
    tier: &'static str,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
}

impl TierStats {
    pub fn new(tier: &'static str) -> Self {
        Self {
            tier,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn tier(&self) -> &'static str {
        self.tier
    }

    pub fn record_hit(&self) {
        self.record_hits(1);
    }

    pub fn record_hits(&self, n: u64) {
        if n > 0 {
            self.hits.fetch_add(n, Ordering::Relaxed);
            metrics::record_cache_hits(self.tier, n);
        }
    }

    pub fn record_miss(&self) {
        self.record_misses(1);
    }

    pub fn record_misses(&self, n: u64) {
        if n > 0 {
            self.misses.fetch_add(n, Ordering::Relaxed);
            metrics::record_cache_misses(self.tier, n);
        }
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_set(self.tier);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_delete(self.tier);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_eviction(self.tier);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_error(self.tier);
    }

    pub fn snapshot(&self) -> TierStatsSnapshot {
        TierStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Copy of a tier's counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub errors: u64,
}

/// Snapshot returned by `get_stats()`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub memory: TierStatsSnapshot,
    pub remote: TierStatsSnapshot,
    /// Fraction (0.0..=1.0) of orchestrator lookups answered from either tier.
    pub hit_ratio: f64,
    /// Entries currently held by the memory tier.
    pub entry_count: u64,
    /// Lookups seen by the orchestrator.
    pub requests: u64,
    /// Keys with a remote fetch or computation currently in flight.
    pub in_flight: usize,
}

impl CacheStats {
    /// Hit ratio as a percentage.
    pub fn hit_rate(&self) -> f64 {
        self.hit_ratio * 100.0
    }
}

/// Owns the per-tier counters plus orchestrator-level lookup counters.
#[derive(Debug, Clone)]
pub struct StatsCollector {
    memory: Arc<TierStats>,
    remote: Arc<TierStats>,
    requests: Arc<AtomicU64>,
    served: Arc<AtomicU64>,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            memory: Arc::new(TierStats::new(MEMORY_TIER)),
            remote: Arc::new(TierStats::new(REMOTE_TIER)),
            requests: Arc::new(AtomicU64::new(0)),
            served: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn memory(&self) -> &Arc<TierStats> {
        &self.memory
    }

    pub fn remote(&self) -> &Arc<TierStats> {
        &self.remote
    }

    /// Count `n` orchestrator lookups.
    pub(crate) fn record_requests(&self, n: u64) {
        self.requests.fetch_add(n, Ordering::Relaxed);
    }

    /// Count `n` lookups that were answered with a value.
    pub(crate) fn record_served(&self, n: u64) {
        self.served.fetch_add(n, Ordering::Relaxed);
    }

    /// Build a snapshot. `entry_count` and `in_flight` come from the
    /// orchestrator, which owns the structures they describe.
    pub fn snapshot(&self, entry_count: u64, in_flight: usize) -> CacheStats {
        let requests = self.requests.load(Ordering::Relaxed);
        let served = self.served.load(Ordering::Relaxed);
        let hit_ratio = if requests == 0 {
            0.0
        } else {
            (served as f64 / requests as f64).min(1.0)
        };

        metrics::set_cache_entries(MEMORY_TIER, entry_count);

        CacheStats {
            memory: self.memory.snapshot(),
            remote: self.remote.snapshot(),
            hit_ratio,
            entry_count,
            requests,
            in_flight,
        }
    }
}
