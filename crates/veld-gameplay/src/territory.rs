//! Territory claim, grant, revert, and activator triggers.
//!
//! Ownership lives on the chunk record; the per-player territory cache only
//! accelerates quota checks and survives divergence (a `grant` bypasses it
//! on purpose). Lock choreography inside `claim`: the target chunk is made
//! resident and adjacent owners are sampled before the `User` lock is taken,
//! because residency goes through the `World` lock which precedes `User` in
//! the hierarchy. The target's `Chunk` lock is taken last and the decision
//! ladder runs under it.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use veld_common::{ChunkCoord, Direction, LocalPos, PlayerId, WorldError};
use veld_world::{CachedChunk, Chunk, ChunkCache};

use crate::monster::area_difficulty;
use crate::player::{
    save_player_best_effort, Player, PlayerStore, ADMIN_LEVEL_GRANT, ADMIN_LEVEL_REVERT,
};

/// Why a claim was denied.
#[derive(Debug, Error)]
pub enum ClaimError {
    /// The chunk already has an owner (real or reserved)
    #[error("Chunk is already owned by {owner}")]
    AlreadyOwned {
        /// Current owner of the chunk
        owner: PlayerId,
    },
    /// The player's territory is at quota
    #[error("Territory quota of {quota} chunks reached")]
    QuotaExceeded {
        /// The player's quota
        quota: usize,
    },
    /// The area outlevels the player
    #[error("Area difficulty {difficulty} exceeds player level {level}")]
    TooDangerous {
        /// Local area difficulty
        difficulty: u32,
        /// The player's level
        level: u32,
    },
    /// No adjacent chunk is owned by the player
    #[error("No adjacent chunk is owned by you")]
    NotAdjacent,
    /// The world layer failed
    #[error(transparent)]
    World(#[from] WorldError),
}

/// Why an administrative territory action was denied.
#[derive(Debug, Error)]
pub enum TerritoryError {
    /// The actor's admin level is too low
    #[error("Not permitted")]
    NotPermitted,
    /// Revert requires an unclaimed or reserved chunk
    #[error("Chunk is owned by {owner}")]
    OwnershipConflict {
        /// Current owner of the chunk
        owner: PlayerId,
    },
    /// The world layer failed
    #[error(transparent)]
    World(#[from] WorldError),
}

/// Territory operations over the chunk cache and player store.
pub struct TerritoryManager {
    cache: Arc<ChunkCache>,
    players: Arc<dyn PlayerStore>,
}

impl TerritoryManager {
    /// Creates a manager over the shared services.
    #[must_use]
    pub fn new(cache: Arc<ChunkCache>, players: Arc<dyn PlayerStore>) -> Self {
        Self { cache, players }
    }

    /// Returns the chunk coordinate the player currently stands in,
    /// optionally offset one chunk in `direction`.
    fn resolve_target(player: &Player, direction: Option<Direction>) -> ChunkCoord {
        let base = ChunkCoord::from_world(player.lock().coord);
        direction.map_or(base, |dir| base.offset(dir))
    }

    /// Authoritative adjacency check: does the player own any chunk sharing
    /// a face with `target`?
    ///
    /// Samples one chunk at a time; resident chunks are read through their
    /// own lock, absent ones straight from the store without making them
    /// resident. A store error counts as not-owned and is logged.
    fn owns_adjacent(&self, target: ChunkCoord, player: PlayerId) -> bool {
        for coord in target.adjacent() {
            let owner = if let Some(cached) = self.cache.find_resident(coord) {
                cached.lock().owner()
            } else {
                match self.cache.store().load(coord) {
                    Ok(Some(chunk)) => chunk.owner(),
                    Ok(None) => PlayerId::NONE,
                    Err(e) => {
                        warn!("Adjacency sample failed for {coord}: {e}");
                        PlayerId::NONE
                    }
                }
            };
            if owner == player {
                return true;
            }
        }
        false
    }

    /// Persists a chunk while its lock is held. Best effort: a failed write
    /// leaves the dirty flag set for the next autosave pass.
    fn persist_locked(&self, chunk: &mut Chunk) {
        match self.cache.store().write(chunk) {
            Ok(()) => chunk.clear_dirty(),
            Err(e) => warn!("Failed to save chunk {}: {e}", chunk.coord()),
        }
    }

    /// Claims the chunk the player stands in (or one chunk over in
    /// `direction`) for the player.
    ///
    /// Denial reasons, in checking order: `AlreadyOwned` (applies to
    /// everyone, admins included), then for non-admins `QuotaExceeded`,
    /// `TooDangerous`, and `NotAdjacent`. A player with no territory yet is
    /// exempt from adjacency. On success the chunk is persisted, the
    /// player's territory cache is updated, and the player is persisted.
    pub fn claim(
        &self,
        player: &Player,
        direction: Option<Direction>,
    ) -> Result<ChunkCoord, ClaimError> {
        let target = Self::resolve_target(player, direction);
        let cached = self.cache.find(target)?;
        let adjacent_owned = self.owns_adjacent(target, player.id());
        let difficulty = area_difficulty(target);

        {
            let mut state = player.lock();
            let mut chunk = cached.lock();

            if chunk.owner() != PlayerId::NONE {
                return Err(ClaimError::AlreadyOwned {
                    owner: chunk.owner(),
                });
            }
            let is_admin = state.admin_level > 0;
            if !is_admin {
                if state.territory.len() >= state.max_chunks {
                    return Err(ClaimError::QuotaExceeded {
                        quota: state.max_chunks,
                    });
                }
                if difficulty > state.level {
                    return Err(ClaimError::TooDangerous {
                        difficulty,
                        level: state.level,
                    });
                }
                if !state.territory.is_empty() && !adjacent_owned {
                    return Err(ClaimError::NotAdjacent);
                }
            }

            chunk.set_owner(player.id());
            self.persist_locked(&mut chunk);

            if state.territory.contains(&target) {
                warn!(
                    "Territory cache of {} already listed {target}",
                    player.name()
                );
            } else {
                state.territory.push(target);
            }
        }

        save_player_best_effort(self.players.as_ref(), player);
        info!("Player {} claimed chunk {target}", player.name());
        Ok(target)
    }

    /// Reassigns the chunk the actor stands in to `target_id`.
    ///
    /// Admin level 5 or above. Neither player's territory cache is updated;
    /// the divergence is logged and tolerated, the chunk record stays
    /// authoritative. Returns the coordinate and the previous owner.
    pub fn grant(
        &self,
        actor: &Player,
        target_id: PlayerId,
    ) -> Result<(ChunkCoord, PlayerId), TerritoryError> {
        if actor.lock().admin_level < ADMIN_LEVEL_GRANT {
            return Err(TerritoryError::NotPermitted);
        }
        let target = Self::resolve_target(actor, None);
        let cached = self.cache.find(target)?;

        let old_owner = {
            let mut chunk = cached.lock();
            let old = chunk.owner();
            chunk.set_owner(target_id);
            self.persist_locked(&mut chunk);
            old
        };

        info!(
            "Granted chunk {target} (was {old_owner}) to {target_id}; territory caches not updated"
        );
        Ok((target, old_owner))
    }

    /// Destroys and recreates the chunk the actor stands in, discarding any
    /// unsaved modifications, and returns the fresh chunk for re-delivery.
    ///
    /// Admin level 10 or above; the chunk must be unclaimed or reserved.
    /// The owner check releases the chunk lock before the cache swap; a
    /// claim racing into that window is discarded with the old chunk.
    pub fn revert(&self, actor: &Player) -> Result<Arc<CachedChunk>, TerritoryError> {
        if actor.lock().admin_level < ADMIN_LEVEL_REVERT {
            return Err(TerritoryError::NotPermitted);
        }
        let target = Self::resolve_target(actor, None);
        let cached = self.cache.find(target)?;
        {
            let chunk = cached.lock();
            let owner = chunk.owner();
            if owner != PlayerId::NONE && owner != PlayerId::RESERVED {
                return Err(TerritoryError::OwnershipConflict { owner });
            }
        }
        drop(cached);

        let fresh = self.cache.recreate(target)?;
        info!("Reverted chunk {target}");
        Ok(fresh)
    }

    /// Adds a trigger message at a voxel position and persists the chunk.
    pub fn add_trigger(
        &self,
        coord: ChunkCoord,
        pos: LocalPos,
        message: String,
    ) -> Result<(), WorldError> {
        let cached = self.cache.find(coord)?;
        let mut chunk = cached.lock();
        chunk.add_activator(pos, message);
        self.persist_locked(&mut chunk);
        Ok(())
    }

    /// Clears the trigger messages at a voxel position and persists.
    ///
    /// Clearing a position with no activator logs a diagnostic and no-ops.
    pub fn clear_trigger(&self, coord: ChunkCoord, pos: LocalPos) -> Result<(), WorldError> {
        let cached = self.cache.find(coord)?;
        let mut chunk = cached.lock();
        if chunk.clear_activator(pos) {
            self.persist_locked(&mut chunk);
        } else {
            debug!("No activator at {pos} in chunk {coord}");
        }
        Ok(())
    }

    /// The trigger messages at a voxel position, if any.
    pub fn triggers_at(
        &self,
        coord: ChunkCoord,
        pos: LocalPos,
    ) -> Result<Option<Vec<String>>, WorldError> {
        let cached = self.cache.find(coord)?;
        let chunk = cached.lock();
        Ok(chunk.activator_messages(pos).map(<[String]>::to_vec))
    }
}

impl std::fmt::Debug for TerritoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerritoryManager").finish_non_exhaustive()
    }
}
