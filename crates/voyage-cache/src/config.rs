use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::MAX_TTL;
use crate::cache::memory::MemoryCapacity;
use crate::cache::warmup::WarmupSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when a write does not name one.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Redis configuration
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub invalidation: InvalidationConfig,
    #[serde(default)]
    pub health: HealthConfig,
    /// Hot-key sets loaded at startup and refreshed on an interval
    #[serde(default)]
    pub warmup: Vec<WarmupSpec>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_ttl_secs() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            memory: MemoryConfig::default(),
            remote: RemoteConfig::default(),
            invalidation: InvalidationConfig::default(),
            health: HealthConfig::default(),
            warmup: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        let max_secs = MAX_TTL.as_secs();
        if self.default_ttl_secs == 0 || self.default_ttl_secs > max_secs {
            return Err(format!("default_ttl_secs must be in 1..={max_secs}"));
        }
        // Memory validations
        if self.memory.capacity == 0 {
            return Err("memory.capacity must be > 0".into());
        }
        if self.memory.max_bytes == Some(0) {
            return Err("memory.max_bytes must be > 0 when set".into());
        }
        if self.memory.max_ttl_secs == 0 || self.memory.max_ttl_secs > max_secs {
            return Err(format!("memory.max_ttl_secs must be in 1..={max_secs}"));
        }
        // Remote validations
        if self.remote.timeout_ms == 0 {
            return Err("remote.timeout_ms must be > 0".into());
        }
        if self.remote.pool_size == 0 {
            return Err("remote.pool_size must be > 0".into());
        }
        if self.remote.enabled
            && !(self.remote.url.starts_with("redis://") || self.remote.url.starts_with("rediss://"))
        {
            return Err("remote.url must start with redis:// or rediss://".into());
        }
        // Invalidation validations
        if self.invalidation.channel.trim().is_empty() {
            return Err("invalidation.channel must not be empty".into());
        }
        if self.invalidation.queue_capacity == 0 {
            return Err("invalidation.queue_capacity must be > 0".into());
        }
        // Health validations
        if self.health.interval_secs == 0 || self.health.interval_secs > max_secs {
            return Err(format!("health.interval_secs must be in 1..={max_secs}"));
        }
        if self.health.failure_threshold == 0 {
            return Err("health.failure_threshold must be > 0".into());
        }
        if self.health.probe_timeout_ms == 0 {
            return Err("health.probe_timeout_ms must be > 0".into());
        }
        // Warmup validations
        let mut names = HashSet::new();
        for spec in &self.warmup {
            if spec.name.trim().is_empty() {
                return Err("warmup.name must not be empty".into());
            }
            if !names.insert(spec.name.as_str()) {
                return Err(format!("duplicate warmup spec name: {}", spec.name));
            }
            if spec.namespace.trim().is_empty() {
                return Err(format!("warmup '{}': namespace must not be empty", spec.name));
            }
            if spec.top_n == 0 {
                return Err(format!("warmup '{}': top_n must be > 0", spec.name));
            }
            let in_range = |secs: u64| (1..=max_secs).contains(&secs);
            if !in_range(spec.interval_secs) || !in_range(spec.ttl_secs) {
                return Err(format!(
                    "warmup '{}': interval_secs and ttl_secs must be in 1..={max_secs}",
                    spec.name
                ));
            }
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of entries in the in-process tier
    #[serde(default = "default_memory_capacity")]
    pub capacity: u64,
    /// Optional byte budget (key + value bytes); replaces the entry bound when set
    #[serde(default)]
    pub max_bytes: Option<u64>,
    /// Upper bound on how long an entry may live in memory
    #[serde(default = "default_memory_max_ttl_secs")]
    pub max_ttl_secs: u64,
}

fn default_memory_capacity() -> u64 {
    10_000
}

fn default_memory_max_ttl_secs() -> u64 {
    300
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_memory_capacity(),
            max_bytes: None,
            max_ttl_secs: default_memory_max_ttl_secs(),
        }
    }
}

impl MemoryConfig {
    pub fn bound(&self) -> MemoryCapacity {
        match self.max_bytes {
            Some(bytes) => MemoryCapacity::Bytes(bytes),
            None => MemoryCapacity::Entries(self.capacity),
        }
    }

    pub fn max_ttl(&self) -> Duration {
        Duration::from_secs(self.max_ttl_secs)
    }
}

/// Redis configuration for the shared tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Use Redis as the remote tier. When disabled, an in-process store
    /// stands in (single-instance deployments).
    #[serde(default)]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Per-call timeout in milliseconds
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_remote_timeout_ms() -> u64 {
    250
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_remote_timeout_ms(),
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationConfig {
    /// Pub/sub channel name
    #[serde(default = "default_invalidation_channel")]
    pub channel: String,
    /// Messages buffered for the background publisher
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_invalidation_channel() -> String {
    "voyage:cache:invalidate".to_string()
}

fn default_queue_capacity() -> usize {
    4096
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            channel: default_invalidation_channel(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
    /// Consecutive failed probes before the remote tier is reported unreachable
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_health_interval_secs() -> u64 {
    10
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_probe_timeout_ms() -> u64 {
    250
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval_secs(),
            failure_threshold: default_failure_threshold(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::CacheConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file, looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "voyage-cache.toml";

    pub fn load_config(path: Option<&str>) -> Result<CacheConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            tracing::warn!(path = %pathbuf.display(), "config file not found, using defaults");
        }
        // Environment variable overrides, e.g., VOYAGE_CACHE__REMOTE__TIMEOUT_MS=100
        builder = builder.add_source(
            Environment::with_prefix("VOYAGE_CACHE")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: CacheConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        // Validate
        merged.validate()?;
        Ok(merged)
    }
}
