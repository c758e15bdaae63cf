//! Two-tier caching for the portal's expensive reads.
//!
//! ## Architecture
//!
//! - **Memory tier (moka)**: In-process, microsecond latency, per-instance
//! - **Remote tier (Redis)**: Network, millisecond latency, shared across instances
//! - **Pub/Sub**: Cross-instance invalidation of memory copies
//!
//! ## Cache Hierarchy
//!
//! ```text
//! get(key) → memory → remote (single-flight) → source (get_or_compute / Memoizer)
//!              ↓           ↓                       ↓
//!          <1µs latency  ~1ms latency         catalog/search latency
//! ```
//!
//! ## Graceful Degradation
//!
//! Every remote call is bounded by a timeout. When the remote tier is slow or
//! down, reads are served from memory (or reported as misses) and writes
//! return `RemoteUnavailable` / `RemoteTimeout`.

use std::sync::Arc;
use std::time::Duration;

pub mod flight;
mod generation;
pub mod health;
pub mod local;
pub mod memoize;
pub mod memory;
pub mod orchestrator;
pub mod pubsub;
pub mod redis_store;
pub mod remote;
pub mod stats;
pub mod task;
pub mod warmup;

/// Cached bytes. Cloning is a reference-count bump.
pub type CacheValue = Arc<Vec<u8>>;

/// Longest TTL a cache write may carry (365 days).
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub use flight::SingleFlight;
pub use health::{HealthMonitor, HealthStatus};
pub use local::InProcessStore;
pub use memoize::{MemoizeError, Memoizer};
pub use memory::{MemoryCapacity, MemoryEntry, MemoryTier};
pub use orchestrator::{BatchWriteReport, CacheOrchestrator, OrchestratorSettings};
pub use pubsub::{
    InvalidationBus, InvalidationHandler, InvalidationMessage, LocalInvalidationBus,
    RedisInvalidationBus, Subscription,
};
pub use redis_store::{RedisStore, create_redis_pool};
pub use remote::{RemoteEntry, RemoteStore, RemoteTier, RemoteWrite};
pub use stats::{CacheStats, StatsCollector, TierStats, TierStatsSnapshot};
pub use task::BackgroundTask;
pub use warmup::{SourceError, WarmupOutcome, WarmupRecord, WarmupScheduler, WarmupSource, WarmupSpec};
