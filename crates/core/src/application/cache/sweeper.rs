// Cache Sweeper
// Periodic expired-entry removal to bound process-local memory

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::info;

use super::ResultCache;
use crate::port::CancelToken;

/// Background sweeper for the result cache
pub struct CacheSweeper {
    cache: Arc<ResultCache>,
    every: Duration,
}

impl CacheSweeper {
    pub fn new(cache: Arc<ResultCache>, every: Duration) -> Self {
        Self { cache, every }
    }

    /// Sweep loop (spawn with tokio::spawn); exits when `stop` fires
    pub async fn run(self, stop: CancelToken) {
        info!(interval_secs = self.every.as_secs(), "Cache sweeper started");

        let mut tick = interval(self.every);
        // First tick completes immediately
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.run_now().await;
                }
                _ = stop.cancelled() => {
                    info!("Cache sweeper stopped");
                    return;
                }
            }
        }
    }

    /// Sweep immediately (manual trigger)
    pub async fn run_now(&self) -> usize {
        self.cache.cleanup_expired().await
    }
}
