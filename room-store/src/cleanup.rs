//! Background sweep of the room directory.
//!
//! Runs periodically to delete expired directory entries and the rooms
//! behind them whose own TTL has passed.

use crate::backend::KvBackend;
use crate::config::CleanupConfig;
use crate::store::RoomStore;
use std::time::Duration;
use tokio::time::interval;

/// Spawn a background sweep task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_sweep_task<B: KvBackend>(
    store: RoomStore<B>,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Directory sweep disabled");
            return;
        }

        let interval_secs = config.interval_secs.max(1);
        tracing::info!("Directory sweep started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;

            match store.sweep_directory().await {
                Ok(removed) if removed > 0 => {
                    tracing::info!("Sweep: removed {} expired directory entries", removed);
                }
                Ok(_) => {
                    tracing::debug!("Sweep: nothing expired");
                }
                Err(e) => {
                    tracing::error!("Sweep error: {}", e);
                }
            }
        }
    })
}
