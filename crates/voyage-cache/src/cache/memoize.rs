//! Declarative memoization of async read operations.
//!
//! A [`Memoizer`] wraps an operation with a key function and a TTL. Calls
//! with arguments that map to the same key share one cached result; the
//! first concurrent calls run the operation once.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::CacheValue;
use super::orchestrator::CacheOrchestrator;
use crate::error::CacheError;
use crate::key::{CacheKey, build_key};

#[derive(Debug, thiserror::Error)]
pub enum MemoizeError<E> {
    /// The wrapped operation failed in this call.
    #[error("memoized operation failed: {0}")]
    Operation(E),

    /// Caching failed, or this call joined another caller whose operation
    /// failed (the error then arrives as [`CacheError::Source`]).
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Caches the results of `op`, keyed by `key_fn(&args)` within `namespace`.
pub struct Memoizer<K, F> {
    orchestrator: Arc<CacheOrchestrator>,
    namespace: String,
    ttl: Option<Duration>,
    key_fn: K,
    op: F,
}

impl<K, F> Memoizer<K, F> {
    /// `ttl: None` uses the orchestrator's default TTL.
    pub fn new(
        orchestrator: Arc<CacheOrchestrator>,
        namespace: impl Into<String>,
        ttl: Option<Duration>,
        key_fn: K,
        op: F,
    ) -> Self {
        Self {
            orchestrator,
            namespace: namespace.into(),
            ttl,
            key_fn,
            op,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Return the cached result for `args`, or run the operation and cache
    /// its result (MessagePack-encoded).
    ///
    /// A cached payload that no longer decodes as `R` is deleted and
    /// recomputed once.
    pub async fn call<A, R, E, Fut>(&self, args: A) -> Result<R, MemoizeError<E>>
    where
        A: Clone,
        K: Fn(&A) -> String,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        R: Serialize + DeserializeOwned,
        E: Display,
    {
        let key = build_key(&self.namespace, &(self.key_fn)(&args), None)?;

        let bytes = self.lookup::<A, R, E, Fut>(&key, args.clone()).await?;
        match rmp_serde::from_slice(&bytes) {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "memoized payload undecodable, recomputing");
                if let Err(e) = self.orchestrator.delete(&key).await {
                    tracing::warn!(key = %key, error = %e, "failed to drop undecodable payload");
                    self.orchestrator.memory().delete(key.as_str());
                }
                let bytes = self.lookup::<A, R, E, Fut>(&key, args).await?;
                rmp_serde::from_slice(&bytes)
                    .map_err(|e| MemoizeError::Cache(CacheError::Serialization(e.to_string())))
            }
        }
    }

    async fn lookup<A, R, E, Fut>(
        &self,
        key: &CacheKey,
        args: A,
    ) -> Result<CacheValue, MemoizeError<E>>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        R: Serialize,
        E: Display,
    {
        let op_error: Mutex<Option<E>> = Mutex::new(None);
        let op_error_slot = &op_error;
        let op = &self.op;

        let result = self
            .orchestrator
            .get_or_compute(key, self.ttl, move || async move {
                match op(args).await {
                    Ok(result) => rmp_serde::to_vec(&result)
                        .map(CacheValue::new)
                        .map_err(|e| CacheError::Serialization(e.to_string())),
                    Err(e) => {
                        let message = e.to_string();
                        *op_error_slot.lock() = Some(e);
                        Err(CacheError::Source(message))
                    }
                }
            })
            .await;

        match result {
            Ok(bytes) => Ok(bytes),
            Err(e) => match op_error.into_inner() {
                Some(op_err) => Err(MemoizeError::Operation(op_err)),
                None => Err(MemoizeError::Cache(e)),
            },
        }
    }
}
