//! Remote tier health tracking.
//!
//! One failed probe is not an outage: the remote tier is reported
//! unreachable only after `failure_threshold` consecutive failures, and the
//! first successful probe restores it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::time::{MissedTickBehavior, interval_at};

use super::remote::RemoteTier;
use super::task::{BackgroundTask, shutdown_requested};
use crate::config::HealthConfig;
use crate::metrics;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub remote_reachable: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_probe_at: Option<OffsetDateTime>,
    pub consecutive_failures: u32,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            remote_reachable: true,
            last_probe_at: None,
            consecutive_failures: 0,
        }
    }
}

/// Periodically pings the remote tier and keeps the last [`HealthStatus`].
#[derive(Clone)]
pub struct HealthMonitor {
    remote: RemoteTier,
    status: Arc<RwLock<HealthStatus>>,
    failure_threshold: u32,
    interval: Duration,
}

impl HealthMonitor {
    /// `remote` should already carry the probe timeout.
    pub fn new(remote: RemoteTier, config: &HealthConfig) -> Self {
        Self {
            remote,
            status: Arc::new(RwLock::new(HealthStatus::default())),
            failure_threshold: config.failure_threshold.max(1),
            interval: config.interval(),
        }
    }

    /// Last known status.
    pub fn status(&self) -> HealthStatus {
        self.status.read().clone()
    }

    /// Probe once and return the updated status.
    pub async fn probe(&self) -> HealthStatus {
        let ok = self.remote.ping().await;
        self.record_probe(ok)
    }

    fn record_probe(&self, ok: bool) -> HealthStatus {
        let mut status = self.status.write();
        let was_reachable = status.remote_reachable;

        status.last_probe_at = Some(OffsetDateTime::now_utc());
        if ok {
            status.consecutive_failures = 0;
            status.remote_reachable = true;
        } else {
            status.consecutive_failures = status.consecutive_failures.saturating_add(1);
            if status.consecutive_failures >= self.failure_threshold {
                status.remote_reachable = false;
            }
        }

        if was_reachable != status.remote_reachable {
            metrics::set_remote_up(status.remote_reachable);
            if status.remote_reachable {
                tracing::info!(backend = self.remote.backend_name(), "remote cache tier recovered");
            } else {
                tracing::warn!(
                    backend = self.remote.backend_name(),
                    consecutive_failures = status.consecutive_failures,
                    "remote cache tier unreachable, serving from memory only"
                );
            }
        }
        status.clone()
    }

    /// Probe every configured interval until stopped.
    pub fn start(&self) -> BackgroundTask {
        let monitor = self.clone();
        metrics::set_remote_up(self.status().remote_reachable);

        BackgroundTask::spawn("health-monitor", move |mut shutdown_rx| async move {
            let start = tokio::time::Instant::now() + monitor.interval;
            let mut ticker = interval_at(start, monitor.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let status = monitor.probe().await;
                        tracing::trace!(reachable = status.remote_reachable, "health probe");
                    }
                    _ = shutdown_requested(&mut shutdown_rx) => {
                        tracing::info!("Health monitor shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::local::InProcessStore;
    use crate::cache::stats::{REMOTE_TIER, TierStats};

    fn monitor(threshold: u32) -> HealthMonitor {
        let remote = RemoteTier::new(
            Arc::new(InProcessStore::new()),
            Duration::from_millis(100),
            Arc::new(TierStats::new(REMOTE_TIER)),
        );
        let config = HealthConfig {
            failure_threshold: threshold,
            ..HealthConfig::default()
        };
        HealthMonitor::new(remote, &config)
    }

    #[test]
    fn test_threshold_and_binary_recovery() {
        let monitor = monitor(3);

        assert!(monitor.record_probe(false).remote_reachable);
        assert!(monitor.record_probe(false).remote_reachable);
        let status = monitor.record_probe(false);
        assert!(!status.remote_reachable);
        assert_eq!(status.consecutive_failures, 3);

        let status = monitor.record_probe(true);
        assert!(status.remote_reachable);
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.last_probe_at.is_some());
    }

    #[tokio::test]
    async fn test_probe_reachable_store() {
        let monitor = monitor(1);
        assert!(monitor.status().last_probe_at.is_none());

        let status = monitor.probe().await;
        assert!(status.remote_reachable);
        assert_eq!(monitor.status(), status);
    }
}
