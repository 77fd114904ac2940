//! The shared service bundle.
//!
//! Every long-lived singleton is constructed once in `main` and passed
//! around as one `Arc<Services>`; nothing lives in ambient global state, so
//! ownership and teardown order stay explicit.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use veld_gameplay::player::PlayerStore;
use veld_gameplay::{MonsterSet, PlayerRegistry, SpatialIndex, TerritoryManager};
use veld_world::{ChunkCache, ChunkStore};

use crate::config::ServerConfig;

/// All shared server services.
pub struct Services {
    /// Operator configuration
    pub config: ServerConfig,
    /// The resident-chunk cache
    pub cache: Arc<ChunkCache>,
    /// Player account persistence
    pub players: Arc<dyn PlayerStore>,
    /// Live sessions
    pub registry: Arc<PlayerRegistry>,
    /// Proximity index over players and monsters
    pub spatial: Arc<SpatialIndex>,
    /// Live monsters
    pub monsters: Arc<MonsterSet>,
    /// Territory operations
    pub territory: TerritoryManager,
    /// Graceful-shutdown signal; workers watch the receiver side
    pub shutdown: watch::Sender<bool>,
    /// Server start time, for `/status`
    pub started: Instant,
}

impl Services {
    /// Wires up the full service graph over the given collaborators.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        chunk_store: Arc<dyn ChunkStore>,
        players: Arc<dyn PlayerStore>,
    ) -> Self {
        let cache = Arc::new(ChunkCache::with_options(
            chunk_store,
            config.inhibit_chunk_creation,
        ));
        let territory = TerritoryManager::new(Arc::clone(&cache), Arc::clone(&players));
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            cache,
            players,
            registry: Arc::new(PlayerRegistry::new()),
            spatial: Arc::new(SpatialIndex::new()),
            monsters: Arc::new(MonsterSet::new()),
            territory,
            shutdown,
            started: Instant::now(),
        }
    }

    /// A fresh receiver for the shutdown signal.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Signals every worker to wind down.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
