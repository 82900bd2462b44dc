//! TTL Sweeper
//!
//! Background task that periodically purges expired status records.
//! Readers already ignore expired rows; the sweep reclaims memory.

use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::MemoryStatusStore;

/// Background TTL sweep task for MemoryStatusStore
pub struct TtlSweeper {
    store: MemoryStatusStore,
    interval: Duration,
}

impl TtlSweeper {
    pub fn new(store: MemoryStatusStore, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Run until cancelled (should be spawned as a task)
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("TTL sweeper started, interval: {:?}", self.interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = self.store.purge_expired();
                    if removed > 0 {
                        debug!(removed = removed, "Purged expired status records");
                    }
                }
            }
        }

        info!("TTL sweeper stopped");
    }

    /// Spawn the sweeper as a background task
    pub fn spawn(
        store: MemoryStatusStore,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(Self::new(store, interval).run(shutdown))
    }
}
