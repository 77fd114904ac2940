//! The concurrent player registry.
//!
//! Two lookup maps over the same set of live sessions, protected by one
//! reader-writer lock in the `Registry` domain. Enumeration runs under the
//! read lock and must therefore stay enqueue-only; anything slower works on
//! a [`PlayerRegistry::snapshot`] with the lock released.

use ahash::AHashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use veld_common::locks::{Domain, OrderedRwLock};
use veld_common::PlayerId;

use crate::player::Player;

/// Errors from session registration.
#[derive(Debug, Error)]
pub enum RegisterError {
    /// Another live session already uses this name
    #[error("Player '{0}' is already logged in")]
    NameInUse(String),
    /// Another live session already uses this id
    #[error("Player id {0} is already logged in")]
    IdInUse(PlayerId),
}

#[derive(Default)]
struct Maps {
    by_name: AHashMap<String, Arc<Player>>,
    by_id: AHashMap<PlayerId, Arc<Player>>,
}

/// Registry of all live sessions, keyed by name and by id.
pub struct PlayerRegistry {
    inner: OrderedRwLock<Maps>,
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: OrderedRwLock::new(Domain::Registry, Maps::default()),
        }
    }

    /// Registers a session under both maps.
    pub fn register(&self, player: Arc<Player>) -> Result<(), RegisterError> {
        let key = player.name().to_lowercase();
        let mut maps = self.inner.write();
        if maps.by_name.contains_key(&key) {
            return Err(RegisterError::NameInUse(player.name().to_string()));
        }
        if maps.by_id.contains_key(&player.id()) {
            return Err(RegisterError::IdInUse(player.id()));
        }
        maps.by_id.insert(player.id(), Arc::clone(&player));
        maps.by_name.insert(key, player);
        Ok(())
    }

    /// Removes a session; returns it if it was registered.
    pub fn unregister(&self, id: PlayerId) -> Option<Arc<Player>> {
        let mut maps = self.inner.write();
        let player = maps.by_id.remove(&id)?;
        maps.by_name.remove(&player.name().to_lowercase());
        debug!("Unregistered player {}", player.name());
        Some(player)
    }

    /// Finds a session by name, case-insensitively.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<Arc<Player>> {
        self.inner.read().by_name.get(&name.to_lowercase()).cloned()
    }

    /// Finds a session by id.
    #[must_use]
    pub fn find_by_id(&self, id: PlayerId) -> Option<Arc<Player>> {
        self.inner.read().by_id.get(&id).cloned()
    }

    /// Runs `f` over every session under the read lock.
    ///
    /// `f` must not block and must not acquire `Registry` or any earlier
    /// domain; use it for enqueue-only work like broadcasts.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Player>)) {
        for player in self.inner.read().by_id.values() {
            f(player);
        }
    }

    /// Clones out all sessions so slower consumers can work lock-free.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Player>> {
        self.inner.read().by_id.values().map(Arc::clone).collect()
    }

    /// Number of live sessions (any connection state).
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.read().by_id.len()
    }

    /// Number of sessions that are in the world.
    #[must_use]
    pub fn count_in(&self) -> usize {
        self.inner
            .read()
            .by_id
            .values()
            .filter(|p| p.is_in())
            .count()
    }
}

impl std::fmt::Debug for PlayerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerRegistry")
            .field("sessions", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::{ConnState, PlayerRecord};
    use tokio::sync::mpsc;
    use veld_common::SchemaVersion;

    fn session(name: &str, id: u32) -> Arc<Player> {
        let record = PlayerRecord {
            version: SchemaVersion::PLAYER_RECORD,
            id: PlayerId::from_raw(id),
            name: name.to_string(),
            password: String::new(),
            admin_level: 0,
            level: 1,
            coord: [0.0; 3],
            home: [0.0; 3],
            revive: [0.0; 3],
            territory: Vec::new(),
            max_chunks: 5,
            friends: Vec::new(),
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(Player::from_record(&record, tx))
    }

    #[test]
    fn test_register_and_find_case_insensitive() {
        let registry = PlayerRegistry::new();
        registry.register(session("Ada", 1)).expect("register");
        assert!(registry.find_by_name("ada").is_some());
        assert!(registry.find_by_name("ADA").is_some());
        assert!(registry.find_by_id(PlayerId::from_raw(1)).is_some());
        assert!(registry.find_by_name("bea").is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = PlayerRegistry::new();
        registry.register(session("Ada", 1)).expect("register");
        assert!(matches!(
            registry.register(session("ada", 2)),
            Err(RegisterError::NameInUse(_))
        ));
        assert!(matches!(
            registry.register(session("Bea", 1)),
            Err(RegisterError::IdInUse(_))
        ));
    }

    #[test]
    fn test_unregister_clears_both_maps() {
        let registry = PlayerRegistry::new();
        registry.register(session("Ada", 1)).expect("register");
        assert!(registry.unregister(PlayerId::from_raw(1)).is_some());
        assert!(registry.find_by_name("ada").is_none());
        assert!(registry.find_by_id(PlayerId::from_raw(1)).is_none());
        assert!(registry.unregister(PlayerId::from_raw(1)).is_none());
    }

    #[test]
    fn test_for_each_and_counts() {
        let registry = PlayerRegistry::new();
        let ada = session("Ada", 1);
        ada.set_conn_state(ConnState::In);
        registry.register(ada).expect("register");
        registry.register(session("Bea", 2)).expect("register");

        let mut names = Vec::new();
        registry.for_each(|p| names.push(p.name().to_string()));
        names.sort();
        assert_eq!(names, vec!["Ada", "Bea"]);
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.count_in(), 1);
    }
}
