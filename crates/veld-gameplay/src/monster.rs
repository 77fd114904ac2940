//! The live monster set and its wandering simulation.
//!
//! Monsters are not persisted; the set exists for the life of the process.
//! The simulation worker snapshots the set, consults the spatial index with
//! no `Monster` lock held, then re-locks to apply movement. `Monster` is the
//! last domain in the hierarchy, so nothing may be acquired after it.

use ahash::AHashMap;
use glam::DVec3;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;
use veld_common::locks::{Domain, OrderedMutex};
use veld_common::{ChunkCoord, MonsterId};

use crate::registry::PlayerRegistry;
use crate::spatial::{EntityRef, SpatialIndex};

/// Distance at which a monster notices a player.
pub const PERCEPTION_RADIUS: f64 = 48.0;

/// Distance per tick when wandering aimlessly.
const WANDER_STEP: f64 = 2.0;

/// Distance per tick when approaching a noticed player.
const APPROACH_STEP: f64 = 3.0;

/// Horizontal radius around a player inside which monsters spawn.
const SPAWN_RADIUS: f64 = 64.0;

/// Difficulty of the area around a chunk.
///
/// Grows with horizontal distance from the world origin, one level per four
/// chunks, so the starting area stays claimable by fresh characters.
#[must_use]
pub fn area_difficulty(coord: ChunkCoord) -> u32 {
    let dist = f64::from(coord.x).hypot(f64::from(coord.y));
    (dist / 4.0) as u32
}

/// A live monster.
#[derive(Debug, Clone, Copy)]
pub struct Monster {
    /// Unique id within this server run
    pub id: MonsterId,
    /// Current world position
    pub pos: DVec3,
    /// Monster level, set from the spawn area's difficulty
    pub level: u32,
}

/// The set of live monsters, guarded by the `Monster`-domain lock.
pub struct MonsterSet {
    monsters: OrderedMutex<AHashMap<MonsterId, Monster>>,
}

impl Default for MonsterSet {
    fn default() -> Self {
        Self::new()
    }
}

impl MonsterSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            monsters: OrderedMutex::new(Domain::Monster, AHashMap::new()),
        }
    }

    /// Spawns a monster at the given position, leveled for its area.
    pub fn spawn(&self, pos: DVec3) -> Monster {
        let monster = Monster {
            id: MonsterId::new(),
            pos,
            level: area_difficulty(ChunkCoord::from_world(pos)),
        };
        self.monsters.lock().insert(monster.id, monster);
        monster
    }

    /// Removes a monster; returns it if it was live.
    pub fn remove(&self, id: MonsterId) -> Option<Monster> {
        self.monsters.lock().remove(&id)
    }

    /// Number of live monsters.
    #[must_use]
    pub fn count(&self) -> usize {
        self.monsters.lock().len()
    }

    /// Copies out all live monsters.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Monster> {
        self.monsters.lock().values().copied().collect()
    }

    /// Applies position updates under one lock acquisition.
    ///
    /// Monsters removed since the moves were computed are skipped; the
    /// applied subset is returned so the caller can update the spatial
    /// index with no lock held.
    pub fn apply_moves(&self, moves: &[(MonsterId, DVec3)]) -> Vec<(MonsterId, DVec3)> {
        let mut monsters = self.monsters.lock();
        let mut applied = Vec::with_capacity(moves.len());
        for &(id, pos) in moves {
            if let Some(monster) = monsters.get_mut(&id) {
                monster.pos = pos;
                applied.push((id, pos));
            }
        }
        applied
    }
}

impl std::fmt::Debug for MonsterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonsterSet")
            .field("count", &self.count())
            .finish()
    }
}

/// Number of monsters within `radius` of a position.
#[must_use]
pub fn near_monster_count(spatial: &SpatialIndex, center: DVec3, radius: f64) -> usize {
    spatial
        .query_radius(center, radius, None)
        .iter()
        .filter(|(entity, _)| matches!(entity, EntityRef::Monster(_)))
        .count()
}

/// Spawns monsters near the given anchor positions until the set reaches
/// `target` monsters.
pub fn maintain_population(
    set: &MonsterSet,
    spatial: &SpatialIndex,
    anchors: &[DVec3],
    target: usize,
) {
    if anchors.is_empty() {
        return;
    }
    while set.count() < target {
        let anchor = anchors[fastrand::usize(..anchors.len())];
        let offset = DVec3::new(
            (fastrand::f64() - 0.5) * 2.0 * SPAWN_RADIUS,
            (fastrand::f64() - 0.5) * 2.0 * SPAWN_RADIUS,
            0.0,
        );
        let monster = set.spawn(anchor + offset);
        spatial.insert_or_update(EntityRef::Monster(monster.id), monster.pos);
    }
}

/// One simulation step: every monster approaches the nearest player it
/// perceives, or wanders.
pub fn simulation_tick(set: &MonsterSet, spatial: &SpatialIndex) {
    let snapshot = set.snapshot();
    let mut moves = Vec::with_capacity(snapshot.len());

    for monster in &snapshot {
        let nearest_player = spatial
            .query_radius(
                monster.pos,
                PERCEPTION_RADIUS,
                Some(EntityRef::Monster(monster.id)),
            )
            .into_iter()
            .filter(|(entity, _)| matches!(entity, EntityRef::Player(_)))
            .min_by(|a, b| {
                a.1.distance_squared(monster.pos)
                    .total_cmp(&b.1.distance_squared(monster.pos))
            });

        let new_pos = match nearest_player {
            Some((_, player_pos)) => {
                let to_player = player_pos - monster.pos;
                let dist = to_player.length();
                if dist > 1.0 {
                    monster.pos + to_player / dist * APPROACH_STEP.min(dist - 1.0)
                } else {
                    monster.pos
                }
            }
            None => {
                monster.pos
                    + DVec3::new(
                        (fastrand::f64() - 0.5) * 2.0 * WANDER_STEP,
                        (fastrand::f64() - 0.5) * 2.0 * WANDER_STEP,
                        0.0,
                    )
            }
        };
        moves.push((monster.id, new_pos));
    }

    for (id, pos) in set.apply_moves(&moves) {
        spatial.insert_or_update(EntityRef::Monster(id), pos);
    }
}

/// Interval-driven monster simulation over the shared services.
///
/// With no players in the world the set is left alone; spawning anchors on
/// live players keeps monsters where someone can meet them.
pub async fn simulation_worker(
    set: Arc<MonsterSet>,
    spatial: Arc<SpatialIndex>,
    registry: Arc<PlayerRegistry>,
    tick: Duration,
    target_population: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let anchors: Vec<DVec3> = registry
                    .snapshot()
                    .iter()
                    .filter(|p| p.is_in())
                    .map(|p| p.lock().coord)
                    .collect();
                if anchors.is_empty() {
                    continue;
                }
                maintain_population(&set, &spatial, &anchors, target_population);
                simulation_tick(&set, &spatial);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Monster worker stopped");
}
