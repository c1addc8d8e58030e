//! Periodic snapshot timer

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::store::StateStore;

/// Runs `StateStore::take_snapshot` on a fixed interval until shut down.
///
/// The first tick fires one full interval after spawning. A failed snapshot
/// is logged and the timer keeps its schedule.
pub struct SnapshotScheduler {
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl SnapshotScheduler {
    pub fn spawn(store: Arc<StateStore>) -> Self {
        let period = store.config().snapshot_interval();
        Self::spawn_with_interval(store, period)
    }

    pub fn spawn_with_interval(store: Arc<StateStore>, period: Duration) -> Self {
        info!("Starting snapshot timer every {:?}", period);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.take_snapshot().await {
                    Ok(snapshot) => {
                        debug!("Snapshot {} written ({} keys)", snapshot.id, snapshot.len())
                    }
                    Err(e) => error!("Snapshot failed: {}", e),
                }
            }
        });

        Self {
            handle: Some(handle),
            interval: period,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the timer and wait for the task to wind down
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
            info!("Snapshot timer stopped");
        }
    }
}

impl Drop for SnapshotScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
