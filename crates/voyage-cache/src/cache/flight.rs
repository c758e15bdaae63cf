//! Per-key deduplication of concurrent work ("single-flight").
//!
//! The first caller for a key becomes the leader and runs the work inline;
//! callers arriving while it runs wait on a watch channel and receive a clone
//! of the leader's result. The table entry is removed when the leader
//! finishes or is dropped. If the leader is cancelled before producing a
//! value, its followers race to become the next leader.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;

type Flight<T> = Arc<watch::Sender<Option<T>>>;

/// Single-flight table keyed by cache key.
pub struct SingleFlight<T> {
    calls: DashMap<String, Flight<T>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with work currently in flight.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Run `work` for `key` unless another caller is already running it, in
    /// which case wait for and return that caller's result.
    pub async fn work<F, Fut>(&self, key: &str, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let flight = loop {
            let mut rx = match self.calls.entry(key.to_string()) {
                Entry::Occupied(entry) => entry.get().subscribe(),
                Entry::Vacant(entry) => {
                    let (tx, _) = watch::channel(None);
                    let tx = Arc::new(tx);
                    entry.insert(Arc::clone(&tx));
                    break tx;
                }
            };

            // Err: the leader was dropped without a result; try to lead.
            if let Ok(done) = rx.wait_for(Option::is_some).await {
                if let Some(value) = Option::clone(&done) {
                    return value;
                }
            }
            tracing::debug!(key = %key, "single-flight leader cancelled, retrying");
        };

        let _guard = LeaderGuard {
            calls: &self.calls,
            key,
            flight: &flight,
        };
        let value = work().await;
        // Publish before the guard removes the entry, so no follower that
        // joined in between misses the result.
        flight.send_replace(Some(value.clone()));
        value
    }
}

/// Removes the leader's table entry on completion or cancellation.
struct LeaderGuard<'a, T> {
    calls: &'a DashMap<String, Flight<T>>,
    key: &'a str,
    flight: &'a Flight<T>,
}

impl<T> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        self.calls
            .remove_if(self.key, |_, current| Arc::ptr_eq(current, self.flight));
    }
}
