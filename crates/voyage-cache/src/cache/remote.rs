//! Remote (L2) tier.
//!
//! [`RemoteStore`] is the seam to the shared key/value store. [`RemoteTier`]
//! wraps a store with the per-call timeout and the tier counters, and maps
//! every failure to `RemoteUnavailable` / `RemoteTimeout` so callers can tell
//! "not cached" apart from "cache unreachable". No retries happen here.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::CacheValue;
use super::stats::TierStats;
use crate::error::CacheError;

/// A value read from the remote store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEntry {
    pub value: CacheValue,
    /// Remaining time to live; `None` when the store holds it without expiry.
    pub ttl: Option<Duration>,
}

/// One entry of a batch write.
#[derive(Clone, Debug)]
pub struct RemoteWrite {
    pub key: String,
    pub value: CacheValue,
    pub ttl: Duration,
}

/// Shared key/value store behind the remote tier.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Backend name for logs and stats ("redis", "in-process", ...).
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, CacheError>;

    async fn set(&self, key: &str, value: CacheValue, ttl: Duration) -> Result<(), CacheError>;

    /// Delete a key. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Fetch many keys in one round trip. Only present keys are returned.
    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, RemoteEntry>, CacheError>;

    /// Write many entries in one round trip.
    ///
    /// The outer error means the whole batch failed; otherwise the returned
    /// vector holds one result per input entry, in input order.
    async fn mset(&self, entries: &[RemoteWrite]) -> Result<Vec<Result<(), CacheError>>, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Timeout-bounded, instrumented client over a [`RemoteStore`].
#[derive(Clone)]
pub struct RemoteTier {
    store: Arc<dyn RemoteStore>,
    timeout: Duration,
    stats: Arc<TierStats>,
}

impl RemoteTier {
    pub fn new(store: Arc<dyn RemoteStore>, timeout: Duration, stats: Arc<TierStats>) -> Self {
        Self {
            store,
            timeout,
            stats,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn stats(&self) -> &Arc<TierStats> {
        &self.stats
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(|e| match e {
                CacheError::RemoteTimeout(_) | CacheError::RemoteUnavailable(_) => e,
                other => CacheError::RemoteUnavailable(other.to_string()),
            }),
            Err(_) => Err(CacheError::RemoteTimeout(self.timeout)),
        };

        if let Err(e) = &result {
            self.stats.record_error();
            tracing::warn!(backend = self.store.name(), op, error = %e, "remote cache call failed");
        }
        result
    }

    pub async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, CacheError> {
        let found = self.bounded("get", self.store.get(key)).await?;
        match &found {
            Some(_) => {
                tracing::debug!(key = %key, "cache hit (remote)");
                self.stats.record_hit();
            }
            None => {
                tracing::debug!(key = %key, "cache miss (remote)");
                self.stats.record_miss();
            }
        }
        Ok(found)
    }

    pub async fn set(&self, key: &str, value: CacheValue, ttl: Duration) -> Result<(), CacheError> {
        self.bounded("set", self.store.set(key, value, ttl)).await?;
        self.stats.record_set();
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.bounded("delete", self.store.delete(key)).await?;
        self.stats.record_delete();
        Ok(())
    }

    pub async fn mget(&self, keys: &[String]) -> Result<HashMap<String, RemoteEntry>, CacheError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let found = self.bounded("mget", self.store.mget(keys)).await?;
        let hits = found.len() as u64;
        self.stats.record_hits(hits);
        self.stats.record_misses((keys.len() as u64).saturating_sub(hits));
        Ok(found)
    }

    /// Batch write. Returns one result per entry, in input order; a failure
    /// of the whole batch is reported as the same error for every entry.
    pub async fn mset(&self, entries: &[RemoteWrite]) -> Vec<Result<(), CacheError>> {
        if entries.is_empty() {
            return Vec::new();
        }

        let results = match self.bounded("mset", self.store.mset(entries)).await {
            Ok(results) if results.len() == entries.len() => results,
            Ok(results) => {
                let e = CacheError::RemoteUnavailable(format!(
                    "store returned {} results for {} entries",
                    results.len(),
                    entries.len()
                ));
                self.stats.record_error();
                vec![Err(e); entries.len()]
            }
            Err(e) => vec![Err(e); entries.len()],
        };

        for result in &results {
            match result {
                Ok(()) => self.stats.record_set(),
                Err(e) => {
                    if !e.is_remote_failure() {
                        continue;
                    }
                    self.stats.record_error();
                }
            }
        }
        results
    }

    /// Probe the store. Never fails; `false` means unreachable or too slow.
    pub async fn ping(&self) -> bool {
        self.bounded("ping", self.store.ping()).await.is_ok()
    }
}
