//! Process-level cache lifecycle.
//!
//! One [`CacheService`] per process: built at bootstrap, shared as
//! `Arc<CacheService>`, torn down with [`CacheService::cleanup`].
//!
//! ```no_run
//! # async fn bootstrap() -> Result<(), voyage_cache::CacheError> {
//! use voyage_cache::{CacheConfig, CacheService};
//!
//! let service = CacheService::builder(CacheConfig::default()).start().await?;
//! let stats = service.get_stats();
//! service.cleanup().await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::cache::health::{HealthMonitor, HealthStatus};
use crate::cache::local::InProcessStore;
use crate::cache::memoize::Memoizer;
use crate::cache::memory::MemoryTier;
use crate::cache::orchestrator::{CacheOrchestrator, OrchestratorSettings};
use crate::cache::pubsub::{InvalidationBus, LocalInvalidationBus, RedisInvalidationBus};
use crate::cache::redis_store::{RedisStore, create_redis_pool};
use crate::cache::remote::{RemoteStore, RemoteTier};
use crate::cache::stats::{CacheStats, StatsCollector};
use crate::cache::task::BackgroundTask;
use crate::cache::warmup::{WarmupOutcome, WarmupScheduler, WarmupSource};
use crate::config::{CacheConfig, loader};
use crate::error::CacheError;

/// Wires the tiers, bus, warmup and health monitoring together.
pub struct CacheServiceBuilder {
    config: CacheConfig,
    remote_store: Option<Arc<dyn RemoteStore>>,
    bus: Option<Arc<dyn InvalidationBus>>,
    sources: HashMap<String, Arc<dyn WarmupSource>>,
    instance_id: Option<Uuid>,
}

impl CacheServiceBuilder {
    /// Use this store as the remote tier instead of the one `remote.enabled`
    /// selects.
    pub fn with_remote_store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.remote_store = Some(store);
        self
    }

    pub fn with_invalidation_bus(mut self, bus: Arc<dyn InvalidationBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Register the source for the warmup spec named `spec_name`.
    pub fn with_warmup_source(
        mut self,
        spec_name: impl Into<String>,
        source: Arc<dyn WarmupSource>,
    ) -> Self {
        self.sources.insert(spec_name.into(), source);
        self
    }

    pub fn with_instance_id(mut self, instance_id: Uuid) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    /// Build the service, run the startup warmup pass and start the
    /// background loops.
    ///
    /// An unreachable remote tier does not fail startup; the service starts
    /// degraded and the health monitor tracks recovery.
    pub async fn start(self) -> Result<CacheService, CacheError> {
        let config = self.config;
        config.validate().map_err(CacheError::Config)?;

        let local_bus = || -> Arc<dyn InvalidationBus> { Arc::new(LocalInvalidationBus::new()) };
        let (store, default_bus) = match self.remote_store {
            Some(store) => (store, local_bus()),
            None if config.remote.enabled => {
                let pool = create_redis_pool(&config.remote)?;
                tracing::info!(url = %config.remote.url, "Using Redis as the remote cache tier");
                let store: Arc<dyn RemoteStore> = Arc::new(RedisStore::new(pool.clone()));
                let bus: Arc<dyn InvalidationBus> = Arc::new(RedisInvalidationBus::new(
                    pool,
                    config.remote.url.clone(),
                    config.invalidation.channel.clone(),
                ));
                (store, bus)
            }
            None => {
                tracing::info!("Redis disabled, using the in-process remote tier");
                let store: Arc<dyn RemoteStore> = Arc::new(InProcessStore::new());
                (store, local_bus())
            }
        };
        let bus = self.bus.unwrap_or(default_bus);

        let stats = StatsCollector::new();
        let memory = MemoryTier::new(config.memory.bound(), Arc::clone(stats.memory()));
        let remote = RemoteTier::new(
            Arc::clone(&store),
            config.remote.timeout(),
            Arc::clone(stats.remote()),
        );

        let mut settings = OrchestratorSettings::from_config(&config);
        if let Some(instance_id) = self.instance_id {
            settings.instance_id = instance_id;
        }

        let orchestrator = Arc::new(CacheOrchestrator::new(
            memory,
            remote,
            bus,
            stats.clone(),
            settings,
        ));
        orchestrator.listen_for_invalidations();

        let health = HealthMonitor::new(
            RemoteTier::new(store, config.health.probe_timeout(), Arc::clone(stats.remote())),
            &config.health,
        );
        let initial = health.probe().await;
        if initial.consecutive_failures > 0 {
            tracing::warn!("remote cache tier unreachable at startup, starting degraded");
        }

        let warmup = Arc::new(WarmupScheduler::new(
            Arc::clone(&orchestrator),
            config.warmup.clone(),
            self.sources,
        ));
        let startup_warmup = warmup.warmup_all().await;
        let failed_specs = startup_warmup.iter().filter(|o| o.error.is_some()).count();
        tracing::info!(
            specs = startup_warmup.len(),
            failed_specs,
            "startup warmup complete"
        );

        let mut tasks = vec![health.start()];
        tasks.extend(warmup.start());

        tracing::info!(
            instance_id = %orchestrator.instance_id(),
            "cache service started"
        );

        Ok(CacheService {
            config,
            orchestrator,
            health,
            warmup,
            startup_warmup,
            tasks: Mutex::new(tasks),
        })
    }
}

/// The process-wide cache.
pub struct CacheService {
    config: CacheConfig,
    orchestrator: Arc<CacheOrchestrator>,
    health: HealthMonitor,
    warmup: Arc<WarmupScheduler>,
    startup_warmup: Vec<WarmupOutcome>,
    tasks: Mutex<Vec<BackgroundTask>>,
}

impl CacheService {
    pub fn builder(config: CacheConfig) -> CacheServiceBuilder {
        CacheServiceBuilder {
            config,
            remote_store: None,
            bus: None,
            sources: HashMap::new(),
            instance_id: None,
        }
    }

    /// Load configuration (file + environment) and start with defaults
    /// for everything else.
    pub async fn from_config_file(path: Option<&str>) -> Result<Self, CacheError> {
        let config = loader::load_config(path).map_err(CacheError::Config)?;
        Self::builder(config).start().await
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<CacheOrchestrator> {
        &self.orchestrator
    }

    pub fn warmup(&self) -> &Arc<WarmupScheduler> {
        &self.warmup
    }

    /// Outcomes of the warmup pass run during startup.
    pub fn startup_warmup(&self) -> &[WarmupOutcome] {
        &self.startup_warmup
    }

    /// Wrap `op` so its results are cached under `namespace`.
    pub fn memoizer<K, F>(
        &self,
        namespace: impl Into<String>,
        ttl: Option<Duration>,
        key_fn: K,
        op: F,
    ) -> Memoizer<K, F> {
        Memoizer::new(Arc::clone(&self.orchestrator), namespace, ttl, key_fn, op)
    }

    pub fn get_stats(&self) -> CacheStats {
        self.orchestrator.stats()
    }

    /// Probe the remote tier now.
    pub async fn health_check(&self) -> HealthStatus {
        self.health.probe().await
    }

    /// Last status recorded by the health monitor.
    pub fn health_status(&self) -> HealthStatus {
        self.health.status()
    }

    /// Stop background loops and the invalidation subscription, then flush
    /// queued invalidations. Safe to call more than once.
    pub async fn cleanup(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.stop().await;
        }
        self.orchestrator.shutdown().await;
        tracing::info!("cache service stopped");
    }
}
