//! Proactive loading of predictable hot keys.
//!
//! Each [`WarmupSpec`] names a hot-key set (e.g. the top 50 products). The
//! business module owning that data registers a [`WarmupSource`] under the
//! spec's name at bootstrap. A pass asks the source for its top N records
//! and writes them through the orchestrator in one batch.
//!
//! Passes never delete keys, and a failing spec never stops the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{MissedTickBehavior, interval_at};

use super::CacheValue;
use super::orchestrator::CacheOrchestrator;
use super::task::{BackgroundTask, shutdown_requested};
use crate::error::CacheError;
use crate::key::{CacheKey, build_key, namespaces};
use crate::metrics;

/// One hot-key set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupSpec {
    /// Unique name; also the name its source is registered under.
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub top_n: usize,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_warmup_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_namespace() -> String {
    namespaces::HOT.to_string()
}

fn default_interval_secs() -> u64 {
    300
}

fn default_warmup_ttl_secs() -> u64 {
    3600
}

impl WarmupSpec {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// A value to preload, identified within its [`WarmupSpec`] namespace.
#[derive(Debug, Clone)]
pub struct WarmupRecord {
    pub identifier: String,
    pub value: CacheValue,
}

impl WarmupRecord {
    pub fn new(identifier: impl Into<String>, value: impl Into<CacheValue>) -> Self {
        Self {
            identifier: identifier.into(),
            value: value.into(),
        }
    }

    /// Record whose value is `value` encoded as JSON, readable with
    /// `CacheOrchestrator::get_json`.
    pub fn json<T: Serialize>(identifier: impl Into<String>, value: &T) -> Result<Self, CacheError> {
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        Ok(Self::new(identifier, bytes))
    }
}

pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// Supplies the current top-N records of a hot-key set.
#[async_trait]
pub trait WarmupSource: Send + Sync {
    async fn fetch_top_n(&self, n: usize) -> Result<Vec<WarmupRecord>, SourceError>;
}

/// Result of one spec's pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmupOutcome {
    pub spec: String,
    /// Keys written to both tiers.
    pub loaded: usize,
    /// Records that could not be keyed or written.
    pub failed: usize,
    /// Set when the pass could not run at all.
    pub error: Option<CacheError>,
}

impl WarmupOutcome {
    fn failed(spec: &WarmupSpec, error: CacheError) -> Self {
        Self {
            spec: spec.name.clone(),
            loaded: 0,
            failed: 0,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.failed == 0
    }
}

/// Runs warmup passes at startup and on each spec's interval.
pub struct WarmupScheduler {
    orchestrator: Arc<CacheOrchestrator>,
    specs: ArcSwap<Vec<WarmupSpec>>,
    sources: HashMap<String, Arc<dyn WarmupSource>>,
}

impl WarmupScheduler {
    pub fn new(
        orchestrator: Arc<CacheOrchestrator>,
        specs: Vec<WarmupSpec>,
        sources: HashMap<String, Arc<dyn WarmupSource>>,
    ) -> Self {
        for spec in &specs {
            if !sources.contains_key(&spec.name) {
                tracing::warn!(spec = %spec.name, "no warmup source registered for spec");
            }
        }
        Self {
            orchestrator,
            specs: ArcSwap::from_pointee(specs),
            sources,
        }
    }

    pub fn specs(&self) -> Arc<Vec<WarmupSpec>> {
        self.specs.load_full()
    }

    fn spec(&self, name: &str) -> Option<WarmupSpec> {
        self.specs.load().iter().find(|spec| spec.name == name).cloned()
    }

    /// Replace the warmup specs. Running loops use the new `top_n`, `ttl` and
    /// namespace from their next tick; interval changes and newly added
    /// specs take effect on the next [`Self::start`].
    pub fn reload(&self, specs: Vec<WarmupSpec>) {
        tracing::info!(specs = specs.len(), "warmup specs reloaded");
        self.specs.store(Arc::new(specs));
    }

    /// Run every spec once, in configured order.
    pub async fn warmup_all(&self) -> Vec<WarmupOutcome> {
        let specs = self.specs();
        let mut outcomes = Vec::with_capacity(specs.len());
        for spec in specs.iter() {
            outcomes.push(self.warmup_spec(spec).await);
        }
        outcomes
    }

    /// Run one spec: fetch its top N records and write them in one batch.
    pub async fn warmup_spec(&self, spec: &WarmupSpec) -> WarmupOutcome {
        let Some(source) = self.sources.get(&spec.name) else {
            let e = CacheError::Source(format!("no warmup source registered for '{}'", spec.name));
            tracing::warn!(spec = %spec.name, "warmup skipped: no source registered");
            return WarmupOutcome::failed(spec, e);
        };

        let mut records = match source.fetch_top_n(spec.top_n).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(spec = %spec.name, error = %e, "warmup source failed");
                return WarmupOutcome::failed(spec, CacheError::Source(e.to_string()));
            }
        };
        records.truncate(spec.top_n);

        let mut unkeyed = 0;
        let entries: Vec<(CacheKey, CacheValue)> = records
            .into_iter()
            .filter_map(
                |record| match build_key(&spec.namespace, &record.identifier, None) {
                    Ok(key) => Some((key, record.value)),
                    Err(e) => {
                        tracing::warn!(spec = %spec.name, error = %e, "warmup record skipped");
                        unkeyed += 1;
                        None
                    }
                },
            )
            .collect();

        let report = self.orchestrator.mset(entries, Some(spec.ttl())).await;
        let outcome = WarmupOutcome {
            spec: spec.name.clone(),
            loaded: report.succeeded.len(),
            failed: unkeyed + report.failed.len(),
            error: None,
        };

        metrics::record_warmup_keys(&spec.name, outcome.loaded);
        tracing::info!(
            spec = %spec.name,
            loaded = outcome.loaded,
            failed = outcome.failed,
            "warmup pass complete"
        );
        outcome
    }

    /// Spawn one refresh loop per spec. The first refresh happens one
    /// interval from now.
    pub fn start(self: &Arc<Self>) -> Vec<BackgroundTask> {
        self.specs()
            .iter()
            .map(|spec| {
                let scheduler = Arc::clone(self);
                let name = spec.name.clone();
                let period = spec.interval();

                BackgroundTask::spawn("warmup", move |mut shutdown_rx| async move {
                    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                match scheduler.spec(&name) {
                                    Some(spec) => {
                                        scheduler.warmup_spec(&spec).await;
                                    }
                                    None => tracing::debug!(spec = %name, "warmup spec removed, skipping"),
                                }
                            }
                            _ = shutdown_requested(&mut shutdown_rx) => {
                                tracing::debug!(spec = %name, "warmup loop shutting down");
                                break;
                            }
                        }
                    }
                })
            })
            .collect()
    }
}
