//! In-process remote store.
//!
//! Stands in for Redis when the service runs as a single instance, and lets
//! several orchestrators in one process (tests, embedded tools) share a
//! "remote" tier. Clones share the same map.
//!
//! Expired entries are dropped when read, on every [`SWEEP_EVERY_WRITES`]th
//! write, and on each `ping` (the health monitor pings on its interval).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheValue, MAX_TTL};
use super::remote::{RemoteEntry, RemoteStore, RemoteWrite};
use crate::error::CacheError;

#[derive(Clone, Debug)]
struct StoredValue {
    value: CacheValue,
    expires_at: Instant,
}

impl StoredValue {
    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at
            .checked_duration_since(now)
            .filter(|d| !d.is_zero())
    }
}

/// Writes between two full expiry sweeps.
pub const SWEEP_EVERY_WRITES: usize = 1024;

/// DashMap-backed [`RemoteStore`] with per-entry expiry.
#[derive(Clone, Default)]
pub struct InProcessStore {
    entries: Arc<DashMap<String, StoredValue>>,
    writes: Arc<AtomicUsize>,
}

impl InProcessStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, key: &str) -> Option<RemoteEntry> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(stored) => match stored.remaining(now) {
                Some(ttl) => {
                    return Some(RemoteEntry {
                        value: Arc::clone(&stored.value),
                        ttl: Some(ttl),
                    });
                }
                None => true,
            },
            None => false,
        };

        if expired {
            self.entries
                .remove_if(key, |_, stored| stored.remaining(now).is_none());
        }
        None
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, stored| stored.remaining(now).is_some());
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "purged expired in-process entries");
        }
        removed
    }

    fn store(&self, key: &str, value: CacheValue, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at: Instant::now() + ttl.min(MAX_TTL),
            },
        );
    }

    fn record_writes(&self, count: usize) {
        let before = self.writes.fetch_add(count, Ordering::Relaxed);
        if (before + count) / SWEEP_EVERY_WRITES > before / SWEEP_EVERY_WRITES {
            self.purge_expired();
        }
    }
}

#[async_trait]
impl RemoteStore for InProcessStore {
    fn name(&self) -> &'static str {
        "in-process"
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, CacheError> {
        Ok(self.lookup(key))
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Duration) -> Result<(), CacheError> {
        self.store(key, value, ttl);
        self.record_writes(1);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, RemoteEntry>, CacheError> {
        Ok(keys
            .iter()
            .filter_map(|key| self.lookup(key).map(|entry| (key.clone(), entry)))
            .collect())
    }

    async fn mset(&self, entries: &[RemoteWrite]) -> Result<Vec<Result<(), CacheError>>, CacheError> {
        let results: Vec<Result<(), CacheError>> = entries
            .iter()
            .map(|entry| {
                self.store(&entry.key, Arc::clone(&entry.value), entry.ttl);
                Ok(())
            })
            .collect();
        self.record_writes(entries.len());
        Ok(results)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.purge_expired();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(s: &str) -> CacheValue {
        Arc::new(s.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_roundtrip_reports_remaining_ttl() {
        let store = InProcessStore::new();
        store.set("k", value("v"), Duration::from_secs(60)).await.unwrap();

        let entry = store.get("k").await.unwrap().expect("present");
        assert_eq!(entry.value, value("v"));
        let ttl = entry.ttl.expect("ttl");
        assert!(ttl <= Duration::from_secs(60));
        assert!(ttl > Duration::from_secs(55));
    }

    #[tokio::test]
    async fn test_expired_entries_are_absent_and_purged() {
        let store = InProcessStore::new();
        store.set("k", value("v"), Duration::from_millis(30)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unread_expired_entries_are_swept_by_ping() {
        let store = InProcessStore::new();
        for i in 0..5 {
            store
                .set(&format!("k{i}"), value("v"), Duration::from_millis(30))
                .await
                .unwrap();
        }
        store.set("live", value("v"), Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.len(), 6);

        store.ping().await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_unread_expired_entries_are_swept_by_writes() {
        let store = InProcessStore::new();
        for i in 0..10 {
            store
                .set(&format!("old{i}"), value("v"), Duration::from_millis(30))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        let writes: Vec<RemoteWrite> = (0..SWEEP_EVERY_WRITES - 10)
            .map(|i| RemoteWrite {
                key: format!("new{i}"),
                value: value("v"),
                ttl: Duration::from_secs(60),
            })
            .collect();
        store.mset(&writes).await.unwrap();

        assert_eq!(store.len(), SWEEP_EVERY_WRITES - 10);
    }

    #[tokio::test]
    async fn test_longest_ttl_is_capped_instead_of_overflowing() {
        let store = InProcessStore::new();
        store.set("k", value("v"), Duration::MAX).await.unwrap();
        store
            .set("s", value("v"), Duration::from_secs(u64::MAX))
            .await
            .unwrap();

        let entry = store.get("k").await.unwrap().expect("present");
        assert!(entry.ttl.expect("ttl") <= MAX_TTL);
        assert!(store.get("s").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let a = InProcessStore::new();
        let b = a.clone();
        a.set("k", value("v"), Duration::from_secs(60)).await.unwrap();
        assert!(b.get("k").await.unwrap().is_some());

        b.delete("k").await.unwrap();
        b.delete("k").await.unwrap();
        assert!(a.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_ops() {
        let store = InProcessStore::new();
        let writes = vec![
            RemoteWrite {
                key: "a".into(),
                value: value("1"),
                ttl: Duration::from_secs(60),
            },
            RemoteWrite {
                key: "b".into(),
                value: value("2"),
                ttl: Duration::from_secs(60),
            },
        ];
        let results = store.mset(&writes).await.unwrap();
        assert!(results.iter().all(Result::is_ok));

        let found = store
            .mget(&["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["b"].value, value("2"));
    }
}
