//! Error taxonomy for the cache service.

use std::time::Duration;

/// Errors returned by cache operations.
///
/// The type is `Clone` so a single outcome can be handed to every caller that
/// joined a deduplicated (single-flight) operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// Caller supplied an unusable namespace, identifier or variant.
    #[error("invalid cache key input: {0}")]
    InvalidKeyInput(String),

    /// Caller supplied a zero TTL, or one longer than [`crate::cache::MAX_TTL`].
    #[error("invalid ttl for key {key}: ttl must be greater than zero and at most 365 days")]
    InvalidTtl { key: String },

    /// The remote tier could not be reached or returned an error.
    #[error("remote cache unavailable: {0}")]
    RemoteUnavailable(String),

    /// A remote call did not complete within the configured timeout.
    #[error("remote cache call timed out after {}ms", .0.as_millis())]
    RemoteTimeout(Duration),

    /// Some entries of a batch write failed.
    #[error("{} of {total} batch entries failed: {}", .failed.len(), .failed.join(", "))]
    PartialBatchFailure { failed: Vec<String>, total: usize },

    /// A value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The authoritative source behind a compute-if-absent call failed.
    #[error("source error: {0}")]
    Source(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Whether this error means "the remote tier is not usable right now".
    ///
    /// Timeouts are treated exactly like unavailability.
    pub fn is_remote_failure(&self) -> bool {
        matches!(
            self,
            CacheError::RemoteUnavailable(_) | CacheError::RemoteTimeout(_)
        )
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::RemoteUnavailable(e.to_string())
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        CacheError::RemoteUnavailable(format!("redis pool error: {e}"))
    }
}
