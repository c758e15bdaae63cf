pub mod cache;
pub mod config;
pub mod error;
pub mod key;
pub mod metrics;
pub mod observability;
pub mod service;

pub use cache::{
    BatchWriteReport, CacheOrchestrator, CacheStats, CacheValue, HealthStatus, InProcessStore,
    InvalidationBus, InvalidationMessage, LocalInvalidationBus, MemoizeError, Memoizer,
    RemoteStore, WarmupOutcome, WarmupRecord, WarmupSource, WarmupSpec,
};
pub use config::{CacheConfig, loader::load_config};
pub use error::CacheError;
pub use key::{CacheKey, build_key, namespaces};
pub use observability::{
    apply_logging_level, init_tracing, init_tracing_from_config, init_tracing_with_level,
};
pub use service::{CacheService, CacheServiceBuilder};
