use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::store::ContentStore;

/// Blobs older than this are eligible for removal.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Time between grooming sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Periodic background sweep that deletes expired blobs from a store.
pub struct GroomingWorker {
    store: Arc<ContentStore>,
    max_age: Duration,
    sweep_interval: Duration,
}

/// Handle to a spawned worker; dropping it leaves the worker running.
pub struct GroomingHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl GroomingHandle {
    /// Signals the worker to stop, including mid-sweep, and waits for it.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

impl GroomingWorker {
    pub fn new(store: Arc<ContentStore>) -> Self {
        Self {
            store,
            max_age: DEFAULT_MAX_AGE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    /// Spawns the sweep loop. The first sweep runs one full interval after
    /// startup so a crash-looping process cannot turn into a delete loop.
    pub fn spawn(self) -> GroomingHandle {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + self.sweep_interval;
            let mut ticks = tokio::time::interval_at(start, self.sweep_interval);

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        info!("grooming worker stopping");
                        break;
                    }
                    _ = ticks.tick() => {
                        match self.store.delete_older_than(self.max_age, &task_cancel).await {
                            Ok(removed) if removed > 0 => {
                                info!(removed, "groomed expired blobs");
                            }
                            Ok(_) => {}
                            // A failed sweep is retried next interval.
                            Err(err) => warn!(error = %err, "grooming sweep failed"),
                        }
                    }
                }
            }
        });

        GroomingHandle { cancel, task }
    }
}
