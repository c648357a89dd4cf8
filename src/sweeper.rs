//! Background expiry sweep.
//!
//! Lazy expiry on read already keeps hot keys honest; the sweeper reclaims
//! memory held by entries nobody reads anymore. The same `sweep` is callable
//! manually, so tests never depend on the timer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::store::CacheStore;

/// Spawn the periodic sweep task. Stops when `shutdown_rx` fires.
pub(crate) fn spawn(
    store: Arc<CacheStore>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "starting expiry sweeper");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the first real
        // sweep happens one full interval after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = store.sweep();
                    if removed > 0 {
                        info!(removed, "sweeper removed expired entries");
                    } else {
                        debug!("sweeper found no expired entries");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("expiry sweeper shutting down");
                    break;
                }
            }
        }
    })
}
