//! Quadtree proximity index over live entities.
//!
//! Partitions the horizontal (x, y) plane; the vertical z axis is kept only
//! in the stored position and applied as a distance filter at query time.
//! The whole structure lives behind one `Spatial`-domain lock, so updates
//! from player movement and the monster tick serialize against radius
//! queries.

use ahash::AHashMap;
use glam::DVec3;
use veld_common::locks::{Domain, OrderedRwLock};
use veld_common::{MonsterId, PlayerId};

/// Default half-extent of the indexed region, world units from the origin.
pub const DEFAULT_HALF_EXTENT: f64 = 1_048_576.0;

const MAX_POINTS: usize = 16;
const MAX_LEVELS: usize = 12;

/// An entity tracked by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    /// A player session
    Player(PlayerId),
    /// A live monster
    Monster(MonsterId),
}

/// Axis-aligned region of the horizontal plane.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Region {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl Region {
    const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    fn intersects(&self, other: &Region) -> bool {
        self.x < other.x + other.width
            && self.x + self.width > other.x
            && self.y < other.y + other.height
            && self.y + self.height > other.y
    }

    /// Quadrant index for a point. Points on the split line go to the upper
    /// half so every point lands in exactly one child.
    fn quadrant(&self, x: f64, y: f64) -> usize {
        let east = x >= self.x + self.width / 2.0;
        let north = y >= self.y + self.height / 2.0;
        (usize::from(north) << 1) | usize::from(east)
    }
}

/// Quadtree node holding point entries.
struct Node {
    region: Region,
    level: usize,
    points: Vec<(DVec3, EntityRef)>,
    children: Option<Box<[Node; 4]>>,
}

impl Node {
    fn new(region: Region, level: usize) -> Self {
        Self {
            region,
            level,
            points: Vec::new(),
            children: None,
        }
    }

    fn insert(&mut self, pos: DVec3, entity: EntityRef) {
        if let Some(children) = &mut self.children {
            let idx = self.region.quadrant(pos.x, pos.y);
            children[idx].insert(pos, entity);
            return;
        }

        self.points.push((pos, entity));

        if self.points.len() > MAX_POINTS && self.level < MAX_LEVELS {
            self.subdivide();
        }
    }

    fn subdivide(&mut self) {
        let half_w = self.region.width / 2.0;
        let half_h = self.region.height / 2.0;
        let x = self.region.x;
        let y = self.region.y;
        let next = self.level + 1;

        let mut children = Box::new([
            Self::new(Region::new(x, y, half_w, half_h), next),
            Self::new(Region::new(x + half_w, y, half_w, half_h), next),
            Self::new(Region::new(x, y + half_h, half_w, half_h), next),
            Self::new(Region::new(x + half_w, y + half_h, half_w, half_h), next),
        ]);

        for (pos, entity) in self.points.drain(..) {
            let idx = self.region.quadrant(pos.x, pos.y);
            children[idx].insert(pos, entity);
        }
        self.children = Some(children);
    }

    fn remove(&mut self, pos: DVec3, entity: EntityRef) -> bool {
        if let Some(children) = &mut self.children {
            let idx = self.region.quadrant(pos.x, pos.y);
            return children[idx].remove(pos, entity);
        }
        if let Some(i) = self.points.iter().position(|(_, e)| *e == entity) {
            self.points.swap_remove(i);
            return true;
        }
        false
    }

    fn query<'a>(&'a self, range: &Region, result: &mut Vec<&'a (DVec3, EntityRef)>) {
        if !self.region.intersects(range) {
            return;
        }
        for entry in &self.points {
            if range.contains(entry.0.x, entry.0.y) {
                result.push(entry);
            }
        }
        if let Some(children) = &self.children {
            for child in children.iter() {
                child.query(range, result);
            }
        }
    }
}

struct IndexState {
    root: Node,
    /// Entity -> last indexed position, needed to find the entry on move.
    positions: AHashMap<EntityRef, DVec3>,
    /// Entities outside the root bounds; scanned linearly at query time.
    outliers: Vec<(DVec3, EntityRef)>,
}

/// The shared proximity index.
pub struct SpatialIndex {
    state: OrderedRwLock<IndexState>,
    bounds: Region,
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialIndex {
    /// Creates an index covering [`DEFAULT_HALF_EXTENT`] around the origin.
    #[must_use]
    pub fn new() -> Self {
        Self::with_half_extent(DEFAULT_HALF_EXTENT)
    }

    /// Creates an index covering `half_extent` world units around the origin.
    #[must_use]
    pub fn with_half_extent(half_extent: f64) -> Self {
        let bounds = Region::new(
            -half_extent,
            -half_extent,
            half_extent * 2.0,
            half_extent * 2.0,
        );
        Self {
            state: OrderedRwLock::new(
                Domain::Spatial,
                IndexState {
                    root: Node::new(bounds, 0),
                    positions: AHashMap::new(),
                    outliers: Vec::new(),
                },
            ),
            bounds,
        }
    }

    /// Inserts an entity, or moves it if it is already indexed.
    pub fn insert_or_update(&self, entity: EntityRef, pos: DVec3) {
        let mut state = self.state.write();
        if let Some(old) = state.positions.insert(entity, pos) {
            if !self.bounds.contains(old.x, old.y) || !state.root.remove(old, entity) {
                state.outliers.retain(|(_, e)| *e != entity);
            }
        }
        if self.bounds.contains(pos.x, pos.y) {
            state.root.insert(pos, entity);
        } else {
            state.outliers.push((pos, entity));
        }
    }

    /// Removes an entity; no-op if it is not indexed.
    pub fn remove(&self, entity: EntityRef) {
        let mut state = self.state.write();
        let Some(old) = state.positions.remove(&entity) else {
            return;
        };
        if !self.bounds.contains(old.x, old.y) || !state.root.remove(old, entity) {
            state.outliers.retain(|(_, e)| *e != entity);
        }
    }

    /// Returns all entities within `radius` (full 3-D distance) of `center`,
    /// excluding `exclude` if given. The result is a snapshot: callers must
    /// tolerate entities that have since moved or gone away.
    #[must_use]
    pub fn query_radius(
        &self,
        center: DVec3,
        radius: f64,
        exclude: Option<EntityRef>,
    ) -> Vec<(EntityRef, DVec3)> {
        let range = Region::new(
            center.x - radius,
            center.y - radius,
            radius * 2.0,
            radius * 2.0,
        );
        let state = self.state.read();
        let mut candidates = Vec::new();
        state.root.query(&range, &mut candidates);

        let radius_sq = radius * radius;
        candidates
            .into_iter()
            .chain(state.outliers.iter())
            .filter(|(pos, entity)| {
                Some(*entity) != exclude && pos.distance_squared(center) <= radius_sq
            })
            .map(|&(pos, entity)| (entity, pos))
            .collect()
    }

    /// Last indexed position of an entity.
    #[must_use]
    pub fn position_of(&self, entity: EntityRef) -> Option<DVec3> {
        self.state.read().positions.get(&entity).copied()
    }

    /// Number of indexed entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().positions.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpatialIndex")
            .field("entities", &self.len())
            .finish_non_exhaustive()
    }
}
