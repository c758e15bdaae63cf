//! Test doubles for the remote tier.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use voyage_cache::cache::{RemoteEntry, RemoteWrite};
use voyage_cache::{
    CacheConfig, CacheError, CacheService, CacheValue, InProcessStore, RemoteStore,
};

pub fn value(s: &str) -> CacheValue {
    Arc::new(s.as_bytes().to_vec())
}

/// Defaults with a short health interval and generous remote timeout.
pub fn test_config() -> CacheConfig {
    let mut config = CacheConfig::default();
    config.memory.capacity = 1_000;
    config.remote.timeout_ms = 1_000;
    config
}

pub async fn start_with_store(store: Arc<dyn RemoteStore>) -> CacheService {
    CacheService::builder(test_config())
        .with_remote_store(store)
        .start()
        .await
        .expect("service starts")
}

/// In-process store that counts reads and can delay them.
#[derive(Clone, Default)]
pub struct CountingStore {
    pub inner: InProcessStore,
    pub gets: Arc<AtomicUsize>,
    pub read_delay: Duration,
}

impl CountingStore {
    pub fn with_delay(read_delay: Duration) -> Self {
        Self {
            read_delay,
            ..Self::default()
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for CountingStore {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Duration) -> Result<(), CacheError> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.delete(key).await
    }

    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, RemoteEntry>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.mget(keys).await
    }

    async fn mset(&self, entries: &[RemoteWrite]) -> Result<Vec<Result<(), CacheError>>, CacheError> {
        self.inner.mset(entries).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// In-process store that can be switched off, or fail chosen keys in batches.
#[derive(Clone, Default)]
pub struct FlakyStore {
    pub inner: InProcessStore,
    down: Arc<AtomicBool>,
    fail_keys: Arc<Mutex<HashSet<String>>>,
}

impl FlakyStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn fail_key(&self, key: &str) {
        self.fail_keys.lock().insert(key.to_string());
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.down.load(Ordering::SeqCst) {
            Err(CacheError::RemoteUnavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, CacheError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, RemoteEntry>, CacheError> {
        self.check()?;
        self.inner.mget(keys).await
    }

    async fn mset(&self, entries: &[RemoteWrite]) -> Result<Vec<Result<(), CacheError>>, CacheError> {
        self.check()?;
        let fail_keys = self.fail_keys.lock().clone();
        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            if fail_keys.contains(&entry.key) {
                results.push(Err(CacheError::RemoteUnavailable(format!(
                    "write rejected for {}",
                    entry.key
                ))));
            } else {
                self.inner
                    .set(&entry.key, Arc::clone(&entry.value), entry.ttl)
                    .await?;
                results.push(Ok(()));
            }
        }
        Ok(results)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.check()
    }
}

/// Store whose every call takes `delay`.
#[derive(Clone, Default)]
pub struct SlowStore {
    pub inner: InProcessStore,
    pub delay: Duration,
}

#[async_trait]
impl RemoteStore for SlowStore {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, CacheError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Duration) -> Result<(), CacheError> {
        tokio::time::sleep(self.delay).await;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        tokio::time::sleep(self.delay).await;
        self.inner.delete(key).await
    }

    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, RemoteEntry>, CacheError> {
        tokio::time::sleep(self.delay).await;
        self.inner.mget(keys).await
    }

    async fn mset(&self, entries: &[RemoteWrite]) -> Result<Vec<Result<(), CacheError>>, CacheError> {
        tokio::time::sleep(self.delay).await;
        self.inner.mset(entries).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// Store whose reads take their snapshot first and reply after `delay`, like
/// a GET whose reply is still on the wire.
#[derive(Clone, Default)]
pub struct LaggingReplyStore {
    pub inner: InProcessStore,
    pub delay: Duration,
}

#[async_trait]
impl RemoteStore for LaggingReplyStore {
    fn name(&self) -> &'static str {
        "lagging"
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, CacheError> {
        let reply = self.inner.get(key).await;
        tokio::time::sleep(self.delay).await;
        reply
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Duration) -> Result<(), CacheError> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.delete(key).await
    }

    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, RemoteEntry>, CacheError> {
        let reply = self.inner.mget(keys).await;
        tokio::time::sleep(self.delay).await;
        reply
    }

    async fn mset(&self, entries: &[RemoteWrite]) -> Result<Vec<Result<(), CacheError>>, CacheError> {
        self.inner.mset(entries).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.inner.ping().await
    }
}

/// Store that reports every key as having no expiry, like a Redis key
/// written without a TTL.
#[derive(Clone, Default)]
pub struct NoExpiryStore {
    pub inner: InProcessStore,
}

#[async_trait]
impl RemoteStore for NoExpiryStore {
    fn name(&self) -> &'static str {
        "no-expiry"
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, CacheError> {
        Ok(self.inner.get(key).await?.map(|entry| RemoteEntry {
            value: entry.value,
            ttl: None,
        }))
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Duration) -> Result<(), CacheError> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.delete(key).await
    }

    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, RemoteEntry>, CacheError> {
        let found = self.inner.mget(keys).await?;
        Ok(found
            .into_iter()
            .map(|(key, entry)| {
                let entry = RemoteEntry {
                    value: entry.value,
                    ttl: None,
                };
                (key, entry)
            })
            .collect())
    }

    async fn mset(&self, entries: &[RemoteWrite]) -> Result<Vec<Result<(), CacheError>>, CacheError> {
        self.inner.mset(entries).await
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
