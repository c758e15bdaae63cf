//! Redis-backed remote store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Pool, PoolConfig, Runtime};
use redis::Value;

use super::CacheValue;
use super::remote::{RemoteEntry, RemoteStore, RemoteWrite};
use crate::config::RemoteConfig;
use crate::error::CacheError;

/// Create the connection pool for the remote tier.
///
/// Pool creation does not connect; an unreachable server surfaces on the first
/// command. A malformed URL is a configuration error.
pub fn create_redis_pool(config: &RemoteConfig) -> Result<Pool, CacheError> {
    let timeout = Some(Duration::from_millis(config.timeout_ms));
    let mut pool_config = PoolConfig::new(config.pool_size);
    pool_config.timeouts.wait = timeout;
    pool_config.timeouts.create = timeout;
    pool_config.timeouts.recycle = timeout;

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    redis_config.pool = Some(pool_config);

    redis_config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| CacheError::Config(format!("failed to create Redis pool: {e}")))
}

/// Milliseconds for `PSETEX`; Redis rejects zero.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Interpret a `PTTL` reply: `-1` = no expiry, `-2` (or anything negative) = gone.
fn parse_pttl(pttl: i64) -> Result<Option<Duration>, ()> {
    match pttl {
        -1 => Ok(None),
        ms if ms >= 0 => Ok(Some(Duration::from_millis(ms as u64))),
        _ => Err(()),
    }
}

fn entry_from_parts(bytes: Option<Vec<u8>>, pttl: i64) -> Option<RemoteEntry> {
    let bytes = bytes?;
    // Expired between GET and PTTL.
    let ttl = parse_pttl(pttl).ok()?;
    Some(RemoteEntry {
        value: CacheValue::new(bytes),
        ttl,
    })
}

/// Map a `PSETEX` pipeline's replies to per-entry results.
///
/// Entries without a reply are reported as failed.
fn batch_results(replies: Vec<Value>, expected: usize) -> Vec<Result<(), CacheError>> {
    if replies.len() != expected {
        tracing::warn!(
            expected,
            received = replies.len(),
            "PSETEX pipeline reply count mismatch, unmatched entries reported as failed"
        );
    }

    let mut results: Vec<Result<(), CacheError>> = replies
        .into_iter()
        .take(expected)
        .map(|reply| match reply {
            Value::Okay => Ok(()),
            Value::SimpleString(ref status) if status == "OK" => Ok(()),
            Value::ServerError(e) => Err(CacheError::RemoteUnavailable(format!("{e:?}"))),
            other => Err(CacheError::RemoteUnavailable(format!(
                "unexpected PSETEX reply: {other:?}"
            ))),
        })
        .collect();
    results.resize(
        expected,
        Err(CacheError::RemoteUnavailable("no reply for PSETEX in pipeline".into())),
    );
    results
}

/// [`RemoteStore`] over a deadpool-redis pool.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteEntry>, CacheError> {
        let mut conn = self.pool.get().await?;
        let (bytes, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .cmd("GET")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(entry_from_parts(bytes, pttl))
    }

    async fn set(&self, key: &str, value: CacheValue, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        let _: () = redis::cmd("PSETEX")
            .arg(key)
            .arg(ttl_millis(ttl))
            .arg(value.as_slice())
            .query_async(&mut conn)
            .await?;
        tracing::debug!(key = %key, ttl_ms = ttl_millis(ttl), "stored in Redis");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<HashMap<String, RemoteEntry>, CacheError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let mut pipe = redis::pipe();
        pipe.cmd("MGET").arg(keys);
        for key in keys {
            pipe.cmd("PTTL").arg(key);
        }

        let mut conn = self.pool.get().await?;
        let replies: Vec<Value> = pipe.query_async(&mut conn).await?;
        let mut replies = replies.into_iter();

        let values: Vec<Option<Vec<u8>>> = match replies.next() {
            Some(reply) => redis::from_redis_value(&reply)?,
            None => {
                return Err(CacheError::RemoteUnavailable(
                    "empty reply to MGET pipeline".into(),
                ));
            }
        };

        let mut found = HashMap::with_capacity(keys.len());
        for ((key, bytes), pttl_reply) in keys.iter().zip(values).zip(replies) {
            let pttl: i64 = redis::from_redis_value(&pttl_reply)?;
            if let Some(entry) = entry_from_parts(bytes, pttl) {
                found.insert(key.clone(), entry);
            }
        }
        Ok(found)
    }

    async fn mset(&self, entries: &[RemoteWrite]) -> Result<Vec<Result<(), CacheError>>, CacheError> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for entry in entries {
            pipe.cmd("PSETEX")
                .arg(&entry.key)
                .arg(ttl_millis(entry.ttl))
                .arg(entry.value.as_slice());
        }

        let mut conn = self.pool.get().await?;
        let replies: Vec<Value> = pipe.query_async(&mut conn).await?;

        Ok(batch_results(replies, entries.len()))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(CacheError::RemoteUnavailable(format!(
                "unexpected PING reply: {pong}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_results_pads_missing_replies() {
        let results = batch_results(vec![Value::Okay], 3);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1..].iter().all(|r| matches!(r, Err(CacheError::RemoteUnavailable(_)))));
    }

    #[test]
    fn test_batch_results_rejects_unexpected_replies() {
        let results = batch_results(
            vec![Value::SimpleString("OK".into()), Value::Nil, Value::Okay],
            3,
        );
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());

        assert_eq!(batch_results(vec![Value::Okay, Value::Okay], 1).len(), 1);
    }

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn test_parse_pttl() {
        assert_eq!(parse_pttl(-1), Ok(None));
        assert_eq!(parse_pttl(1500), Ok(Some(Duration::from_millis(1500))));
        assert!(parse_pttl(-2).is_err());
    }

    #[test]
    fn test_entry_from_parts() {
        assert!(entry_from_parts(None, 1000).is_none());
        assert!(entry_from_parts(Some(b"v".to_vec()), -2).is_none());

        let entry = entry_from_parts(Some(b"v".to_vec()), 1000).expect("entry");
        assert_eq!(entry.value.as_slice(), b"v");
        assert_eq!(entry.ttl, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_bad_url_is_config_error() {
        let config = RemoteConfig {
            enabled: true,
            url: "not a url".into(),
            ..RemoteConfig::default()
        };
        assert!(matches!(
            create_redis_pool(&config),
            Err(CacheError::Config(_))
        ));
    }
}
