//! Two-tier read/write coordination.
//!
//! ## Read path
//!
//! 1. Memory tier (no await)
//! 2. Remote tier, one fetch per key at a time (single-flight); the leader
//!    re-checks memory before going remote
//! 3. Remote hits are promoted into memory for
//!    `min(remaining remote ttl, memory.max_ttl)`, unless the key was
//!    written, deleted or invalidated while the remote read was in flight
//!
//! Remote failures on reads are logged and reported as misses.
//!
//! ## Write path
//!
//! Remote first, then memory, then an invalidation is queued for the
//! background publisher. A remote failure fails the write and leaves memory
//! untouched.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::{CacheValue, MAX_TTL};
use super::flight::SingleFlight;
use super::generation::KeyGenerations;
use super::memory::MemoryTier;
use super::pubsub::{
    InvalidationBus, InvalidationHandler, InvalidationMessage, InvalidationPublisher, Subscription,
};
use super::remote::{RemoteEntry, RemoteTier, RemoteWrite};
use super::stats::{CacheStats, StatsCollector};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::metrics;

/// Tunables for a [`CacheOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Identifies this process on the invalidation bus.
    pub instance_id: Uuid,
    /// TTL for writes that do not name one.
    pub default_ttl: Duration,
    /// Upper bound on memory-tier TTLs.
    pub memory_max_ttl: Duration,
    pub invalidation_queue_capacity: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            default_ttl: config.default_ttl(),
            memory_max_ttl: config.memory.max_ttl(),
            invalidation_queue_capacity: config.invalidation.queue_capacity,
        }
    }
}

/// Outcome of [`CacheOrchestrator::mset`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchWriteReport {
    pub succeeded: Vec<CacheKey>,
    pub failed: Vec<(CacheKey, CacheError)>,
}

impl BatchWriteReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// `Ok(succeeded)` when every entry was written, otherwise
    /// [`CacheError::PartialBatchFailure`] naming the failed keys.
    pub fn into_result(self) -> Result<Vec<CacheKey>, CacheError> {
        if self.failed.is_empty() {
            return Ok(self.succeeded);
        }
        let total = self.total();
        Err(CacheError::PartialBatchFailure {
            failed: self
                .failed
                .into_iter()
                .map(|(key, _)| key.into_string())
                .collect(),
            total,
        })
    }
}

/// Coordinates the memory and remote tiers, single-flight and invalidation.
///
/// Must be created inside a tokio runtime (it spawns the invalidation
/// publisher).
pub struct CacheOrchestrator {
    settings: OrchestratorSettings,
    memory: Arc<MemoryTier>,
    generations: Arc<KeyGenerations>,
    remote: RemoteTier,
    bus: Arc<dyn InvalidationBus>,
    publisher: InvalidationPublisher,
    subscription: Mutex<Option<Subscription>>,
    reads: SingleFlight<Option<CacheValue>>,
    computes: SingleFlight<Result<CacheValue, CacheError>>,
    stats: StatsCollector,
}

impl CacheOrchestrator {
    /// `memory` and `remote` should record into `stats.memory()` and
    /// `stats.remote()` so that snapshots see their counters.
    pub fn new(
        memory: MemoryTier,
        remote: RemoteTier,
        bus: Arc<dyn InvalidationBus>,
        stats: StatsCollector,
        settings: OrchestratorSettings,
    ) -> Self {
        let publisher =
            InvalidationPublisher::spawn(Arc::clone(&bus), settings.invalidation_queue_capacity);
        tracing::info!(
            instance_id = %settings.instance_id,
            remote = remote.backend_name(),
            bus = bus.name(),
            "cache orchestrator created"
        );

        Self {
            settings,
            memory: Arc::new(memory),
            generations: Arc::new(KeyGenerations::new()),
            remote,
            bus,
            publisher,
            subscription: Mutex::new(None),
            reads: SingleFlight::new(),
            computes: SingleFlight::new(),
            stats,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.settings.instance_id
    }

    pub fn default_ttl(&self) -> Duration {
        self.settings.default_ttl
    }

    pub fn memory(&self) -> &MemoryTier {
        &self.memory
    }

    pub fn remote(&self) -> &RemoteTier {
        &self.remote
    }

    /// Point-in-time statistics for both tiers.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(
            self.memory.entry_count(),
            self.reads.len() + self.computes.len(),
        )
    }

    fn resolve_ttl(&self, key: &CacheKey, ttl: Option<Duration>) -> Result<Duration, CacheError> {
        let ttl = ttl.unwrap_or(self.settings.default_ttl);
        if ttl.is_zero() || ttl > MAX_TTL {
            return Err(CacheError::InvalidTtl {
                key: key.to_string(),
            });
        }
        Ok(ttl)
    }

    fn memory_ttl(&self, ttl: Duration) -> Duration {
        ttl.min(self.settings.memory_max_ttl)
    }

    /// Copy a remote hit into memory if the key's generation is still `seen`.
    fn promote(&self, key: &str, entry: &RemoteEntry, seen: u64) {
        let ttl = self.memory_ttl(entry.ttl.unwrap_or(self.settings.memory_max_ttl));
        let promoted = self.generations.apply_if_current(key, seen, || {
            self.memory.set(key, Arc::clone(&entry.value), ttl);
        });
        if !promoted {
            tracing::debug!(key = %key, "key changed during remote read, not promoting");
        }
    }

    /// Store `value` in memory as the newest version of `key`.
    fn store_local(&self, key: &str, value: CacheValue, ttl: Duration) {
        let ttl = self.memory_ttl(ttl);
        self.generations
            .advance(key, || self.memory.set(key, value, ttl));
    }

    /// Drop the memory copy of `key` and block in-flight promotions of it.
    fn evict_local(&self, key: &str) {
        self.generations.advance(key, || {
            self.memory.delete(key);
        });
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Read-through lookup. Remote failures are reported as a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        self.stats.record_requests(1);

        if let Some(value) = self.memory.get(key.as_str()) {
            self.stats.record_served(1);
            return Some(value);
        }

        let value = self
            .reads
            .work(key.as_str(), || self.fetch_remote(key))
            .await;
        if value.is_some() {
            self.stats.record_served(1);
        }
        value
    }

    async fn fetch_remote(&self, key: &CacheKey) -> Option<CacheValue> {
        // A previous leader may have promoted the value since our miss.
        if let Some(value) = self.memory.peek(key.as_str()) {
            return Some(value);
        }

        let seen = self.generations.current(key.as_str());
        match self.remote.get(key.as_str()).await {
            Ok(Some(entry)) => {
                self.promote(key.as_str(), &entry, seen);
                Some(entry.value)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "remote tier unavailable, treating as miss");
                None
            }
        }
    }

    /// Look up many keys. Results are in request order; absent keys map to
    /// `None`. Keys missing from memory are fetched in one remote round trip.
    pub async fn mget(&self, keys: &[CacheKey]) -> Vec<(CacheKey, Option<CacheValue>)> {
        self.stats.record_requests(keys.len() as u64);

        let mut values: Vec<Option<CacheValue>> = keys
            .iter()
            .map(|key| self.memory.get(key.as_str()))
            .collect();

        let mut seen = HashSet::new();
        let missing: Vec<String> = keys
            .iter()
            .zip(&values)
            .filter(|(_, value)| value.is_none())
            .map(|(key, _)| key.as_str())
            .filter(|key| seen.insert(*key))
            .map(str::to_string)
            .collect();

        if !missing.is_empty() {
            let seen: HashMap<&str, u64> = missing
                .iter()
                .map(|key| (key.as_str(), self.generations.current(key)))
                .collect();
            match self.remote.mget(&missing).await {
                Ok(found) => {
                    for (key, entry) in &found {
                        if let Some(&generation) = seen.get(key.as_str()) {
                            self.promote(key, entry, generation);
                        }
                    }
                    for (key, value) in keys.iter().zip(values.iter_mut()) {
                        if value.is_none() {
                            *value = found.get(key.as_str()).map(|entry| Arc::clone(&entry.value));
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        keys = missing.len(),
                        error = %e,
                        "remote tier unavailable during batch read, treating as misses"
                    );
                }
            }
        }

        let served = values.iter().filter(|value| value.is_some()).count();
        self.stats.record_served(served as u64);

        keys.iter().cloned().zip(values).collect()
    }

    /// Decode a JSON value written with [`Self::set_json`].
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> Result<Option<T>, CacheError> {
        match self.get(key).await {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| CacheError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Write-through. `ttl` defaults to the configured default TTL.
    pub async fn set(
        &self,
        key: &CacheKey,
        value: impl Into<CacheValue>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let ttl = self.resolve_ttl(key, ttl)?;
        self.write_through(key, value.into(), ttl).await
    }

    async fn write_through(
        &self,
        key: &CacheKey,
        value: CacheValue,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.remote
            .set(key.as_str(), Arc::clone(&value), ttl)
            .await?;
        self.store_local(key.as_str(), value, ttl);
        self.invalidate_peers(key).await;
        Ok(())
    }

    pub async fn set_json<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.set(key, bytes, ttl).await
    }

    /// Remove a key from both tiers. Idempotent.
    ///
    /// The local copy is dropped even when the remote delete fails; the
    /// remote error is still returned and no invalidation is published.
    pub async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        let remote_result = self.remote.delete(key.as_str()).await;
        self.evict_local(key.as_str());
        remote_result?;
        self.invalidate_peers(key).await;
        Ok(())
    }

    /// Write many entries with one remote round trip.
    ///
    /// Entries the remote tier accepted are written to memory and
    /// invalidated on peers; the rest are reported with their error.
    pub async fn mset(
        &self,
        entries: Vec<(CacheKey, CacheValue)>,
        ttl: Option<Duration>,
    ) -> BatchWriteReport {
        let mut report = BatchWriteReport::default();
        if entries.is_empty() {
            return report;
        }

        let ttl = ttl.unwrap_or(self.settings.default_ttl);
        if ttl.is_zero() || ttl > MAX_TTL {
            report.failed = entries
                .into_iter()
                .map(|(key, _)| {
                    let e = CacheError::InvalidTtl {
                        key: key.to_string(),
                    };
                    (key, e)
                })
                .collect();
            return report;
        }

        let writes: Vec<RemoteWrite> = entries
            .iter()
            .map(|(key, value)| RemoteWrite {
                key: key.as_str().to_string(),
                value: Arc::clone(value),
                ttl,
            })
            .collect();
        let results = self.remote.mset(&writes).await;

        for ((key, value), result) in entries.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    self.store_local(key.as_str(), value, ttl);
                    self.invalidate_peers(&key).await;
                    report.succeeded.push(key);
                }
                Err(e) => report.failed.push((key, e)),
            }
        }

        if !report.is_complete() {
            tracing::warn!(
                failed = report.failed.len(),
                total = report.total(),
                "batch write partially failed"
            );
        }
        report
    }

    // -----------------------------------------------------------------------
    // Compute-if-absent
    // -----------------------------------------------------------------------

    /// Return the cached value for `key`, or run `compute`, cache and return
    /// its result. At most one `compute` per key runs at a time; concurrent
    /// callers share its outcome.
    ///
    /// A failed write-through is logged and the computed value is still
    /// returned.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<CacheValue, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheValue, CacheError>>,
    {
        let ttl = self.resolve_ttl(key, ttl)?;
        self.stats.record_requests(1);

        if let Some(value) = self.memory.get(key.as_str()) {
            self.stats.record_served(1);
            return Ok(value);
        }

        let from_cache = AtomicBool::new(false);
        let result = self
            .computes
            .work(key.as_str(), || async {
                if let Some(value) = self.fetch_remote(key).await {
                    from_cache.store(true, Ordering::Relaxed);
                    return Ok(value);
                }

                let value = compute().await?;
                if let Err(e) = self.write_through(key, Arc::clone(&value), ttl).await {
                    tracing::warn!(key = %key, error = %e, "computed value could not be cached");
                }
                Ok(value)
            })
            .await;

        if from_cache.load(Ordering::Relaxed) {
            self.stats.record_served(1);
        }
        result
    }

    // -----------------------------------------------------------------------
    // Invalidation
    // -----------------------------------------------------------------------

    async fn invalidate_peers(&self, key: &CacheKey) {
        self.publisher
            .enqueue(InvalidationMessage::new(key.clone(), self.settings.instance_id))
            .await;
    }

    /// Subscribe the memory tier to the invalidation bus. Calling this more
    /// than once has no further effect.
    pub fn listen_for_invalidations(&self) {
        let mut subscription = self.subscription.lock();
        if subscription.is_some() {
            return;
        }

        let memory = Arc::clone(&self.memory);
        let generations = Arc::clone(&self.generations);
        let instance_id = self.settings.instance_id;
        let handler: InvalidationHandler = Arc::new(move |message: InvalidationMessage| {
            if message.originator_id == instance_id {
                return;
            }
            metrics::record_invalidation_received();
            tracing::debug!(key = %message.key, originator = %message.originator_id, "received cache invalidation");
            generations.advance(message.key.as_str(), || {
                memory.delete(message.key.as_str());
            });
        });

        *subscription = Some(self.bus.subscribe(handler));
        tracing::info!(bus = self.bus.name(), "listening for cache invalidations");
    }

    pub fn is_listening(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Stop the invalidation subscription and flush queued publications.
    pub async fn shutdown(&self) {
        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.stop().await;
        }
        self.publisher.shutdown().await;
        tracing::info!(instance_id = %self.settings.instance_id, "cache orchestrator stopped");
    }
}
