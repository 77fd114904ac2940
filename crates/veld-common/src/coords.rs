//! Coordinate types for chunk, local, and world positions.

use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Side length of a chunk in world units (blocks per axis).
pub const CHUNK_EXTENT: i64 = 32;

/// Chunk coordinate identifying a chunk in the world grid.
///
/// A pure value type: two coordinates are the same chunk iff they are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkCoord {
    /// X coordinate in chunk space
    pub x: i32,
    /// Y coordinate in chunk space
    pub y: i32,
    /// Z coordinate in chunk space
    pub z: i32,
}

impl ChunkCoord {
    /// Creates a new chunk coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Converts a world position to the chunk containing it.
    #[must_use]
    pub fn from_world(pos: DVec3) -> Self {
        let size = CHUNK_EXTENT as f64;
        Self {
            x: (pos.x.div_euclid(size)) as i32,
            y: (pos.y.div_euclid(size)) as i32,
            z: (pos.z.div_euclid(size)) as i32,
        }
    }

    /// Returns the world position of this chunk's minimum corner.
    #[must_use]
    pub fn to_world(self) -> DVec3 {
        let size = CHUNK_EXTENT as f64;
        DVec3::new(
            f64::from(self.x) * size,
            f64::from(self.y) * size,
            f64::from(self.z) * size,
        )
    }

    /// Returns this coordinate shifted one chunk in the given direction.
    #[must_use]
    pub const fn offset(self, dir: Direction) -> Self {
        let (dx, dy, dz) = dir.delta();
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }

    /// Returns the six face-adjacent chunk coordinates (6-connectivity).
    #[must_use]
    pub const fn adjacent(self) -> [Self; 6] {
        [
            self.offset(Direction::East),
            self.offset(Direction::West),
            self.offset(Direction::North),
            self.offset(Direction::South),
            self.offset(Direction::Up),
            self.offset(Direction::Down),
        ]
    }

    /// Checks whether `other` shares a face with this chunk.
    #[must_use]
    pub const fn is_adjacent(self, other: Self) -> bool {
        let dx = (self.x - other.x).abs();
        let dy = (self.y - other.y).abs();
        let dz = (self.z - other.z).abs();
        dx + dy + dz == 1
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

/// Voxel position within a chunk (0 to `CHUNK_EXTENT`-1 per axis).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalPos {
    /// X within chunk
    pub x: u8,
    /// Y within chunk
    pub y: u8,
    /// Z within chunk
    pub z: u8,
}

impl LocalPos {
    /// Creates a new local position.
    #[must_use]
    pub const fn new(x: u8, y: u8, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Checks the position lies inside chunk bounds.
    #[must_use]
    pub const fn in_bounds(self) -> bool {
        (self.x as i64) < CHUNK_EXTENT && (self.y as i64) < CHUNK_EXTENT && (self.z as i64) < CHUNK_EXTENT
    }
}

impl fmt::Display for LocalPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

/// One of the six axis directions used by `/territory claim`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// +X
    East,
    /// -X
    West,
    /// +Y
    North,
    /// -Y
    South,
    /// +Z
    Up,
    /// -Z
    Down,
}

impl Direction {
    /// Returns the chunk-coordinate delta for this direction.
    #[must_use]
    pub const fn delta(self) -> (i32, i32, i32) {
        match self {
            Self::East => (1, 0, 0),
            Self::West => (-1, 0, 0),
            Self::North => (0, 1, 0),
            Self::South => (0, -1, 0),
            Self::Up => (0, 0, 1),
            Self::Down => (0, 0, -1),
        }
    }
}

impl FromStr for Direction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "east" => Ok(Self::East),
            "west" => Ok(Self::West),
            "north" => Ok(Self::North),
            "south" => Ok(Self::South),
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            _ => Err(()),
        }
    }
}
