//! Background expiry sweep.
//!
//! # Responsibilities
//! - Periodically purge expired entries so idle keys don't hold capacity
//! - Publish the entry-count gauge
//!
//! # Design Decisions
//! - Reads already expire lazily; the sweep is an optimization, not a correctness requirement
//! - Stops on the shutdown broadcast

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::cache::store::ShardedCache;
use crate::observability::metrics;

pub struct CacheSweeper {
    cache: Arc<ShardedCache>,
    interval: Duration,
}

impl CacheSweeper {
    pub fn new(cache: Arc<ShardedCache>, interval: Duration) -> Self {
        Self { cache, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Cache sweeper starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing can have expired yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Cache sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Run one sweep. Returns the number of purged entries.
    pub fn sweep_once(&self) -> usize {
        let purged = self.cache.purge_expired();
        let remaining = self.cache.len();
        metrics::record_cache_entries(remaining);
        if purged > 0 {
            tracing::debug!(purged, remaining, "Expired cache entries purged");
        }
        purged
    }
}
