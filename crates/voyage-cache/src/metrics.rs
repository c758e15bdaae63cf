//! Cache metrics recorded through the `metrics` facade.
//!
//! The embedding service decides how (and whether) to export them, e.g. by
//! installing a Prometheus recorder. Without a recorder every call is a no-op.

use metrics::{counter, gauge};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_SETS_TOTAL: &str = "cache_sets_total";
    pub const CACHE_DELETES_TOTAL: &str = "cache_deletes_total";
    pub const CACHE_EVICTIONS_TOTAL: &str = "cache_evictions_total";
    pub const CACHE_ERRORS_TOTAL: &str = "cache_errors_total";
    pub const CACHE_ENTRIES: &str = "cache_entries";
    pub const CACHE_REMOTE_UP: &str = "cache_remote_up";
    pub const CACHE_WARMUP_KEYS_TOTAL: &str = "cache_warmup_keys_total";
    pub const CACHE_INVALIDATIONS_RECEIVED_TOTAL: &str = "cache_invalidations_received_total";
}

/// Record `count` cache hits on the given tier.
pub fn record_cache_hits(tier: &'static str, count: u64) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(count);
}

/// Record `count` cache misses on the given tier.
pub fn record_cache_misses(tier: &'static str, count: u64) {
    counter!(names::CACHE_MISSES_TOTAL, "tier" => tier).increment(count);
}

pub fn record_cache_set(tier: &'static str) {
    counter!(names::CACHE_SETS_TOTAL, "tier" => tier).increment(1);
}

pub fn record_cache_delete(tier: &'static str) {
    counter!(names::CACHE_DELETES_TOTAL, "tier" => tier).increment(1);
}

pub fn record_cache_eviction(tier: &'static str) {
    counter!(names::CACHE_EVICTIONS_TOTAL, "tier" => tier).increment(1);
}

pub fn record_cache_error(tier: &'static str) {
    counter!(names::CACHE_ERRORS_TOTAL, "tier" => tier).increment(1);
}

/// Set the number of entries currently held by a tier.
pub fn set_cache_entries(tier: &'static str, count: u64) {
    gauge!(names::CACHE_ENTRIES, "tier" => tier).set(count as f64);
}

/// 1.0 when the remote tier is considered reachable, 0.0 otherwise.
pub fn set_remote_up(up: bool) {
    gauge!(names::CACHE_REMOTE_UP).set(if up { 1.0 } else { 0.0 });
}

/// Record keys loaded by a warmup pass.
pub fn record_warmup_keys(spec: &str, loaded: usize) {
    counter!(names::CACHE_WARMUP_KEYS_TOTAL, "spec" => spec.to_string()).increment(loaded as u64);
}

pub fn record_invalidation_received() {
    counter!(names::CACHE_INVALIDATIONS_RECEIVED_TOTAL).increment(1);
}
