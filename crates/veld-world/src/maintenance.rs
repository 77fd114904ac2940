//! Background maintenance workers over the chunk cache.
//!
//! Autosave flushes modified resident chunks; purge evicts idle ones. Both
//! are interval-driven tasks that run for the life of the server process and
//! wind down when the shutdown signal flips.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::cache::ChunkCache;

/// Periodically flushes modified resident chunks to the store.
///
/// Independent of claim/grant/revert, which persist synchronously; this pass
/// exists to catch activator edits and retry earlier failed writes.
pub async fn autosave_worker(
    cache: Arc<ChunkCache>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let cache = Arc::clone(&cache);
                let saved = tokio::task::spawn_blocking(move || cache.flush_all())
                    .await
                    .unwrap_or(0);
                if saved > 0 {
                    info!("Autosave wrote {saved} chunks");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    // Final flush so an orderly shutdown leaves nothing dirty behind.
    let saved = cache.flush_all();
    debug!("Autosave worker stopped, final flush wrote {saved} chunks");
}

/// Periodically evicts chunks idle beyond `idle_threshold`.
pub async fn purge_worker(
    cache: Arc<ChunkCache>,
    interval: Duration,
    idle_threshold: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let cache = Arc::clone(&cache);
                let evicted =
                    tokio::task::spawn_blocking(move || cache.purge_idle(idle_threshold))
                        .await
                        .unwrap_or(0);
                if evicted > 0 {
                    debug!("Purge evicted {evicted} chunks");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Purge worker stopped");
}
