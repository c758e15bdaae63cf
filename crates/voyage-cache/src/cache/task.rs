//! Stoppable background tasks.

use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A spawned loop plus the shutdown switch it watches.
///
/// The loop receives a `watch::Receiver<bool>` and must return once
/// [`shutdown_requested`] resolves. Dropping the handle without calling
/// [`BackgroundTask::stop`] also signals shutdown.
pub struct BackgroundTask {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawn `body` on the current tokio runtime.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(body(shutdown_rx));
        tracing::debug!(task = name, "background task started");
        Self {
            name,
            shutdown,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal shutdown and wait for the loop to return.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!(task = self.name, error = %e, "background task ended abnormally");
        } else {
            tracing::debug!(task = self.name, "background task stopped");
        }
    }
}

/// Resolves once shutdown has been requested or the [`BackgroundTask`] is gone.
pub async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}
