//! Chunk data structure and serialization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use veld_common::{ChunkCoord, LocalPos, MagicBytes, PlayerId, SchemaVersion, StoreError, StoreResult};

/// Chunk file header for format identification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkHeader {
    /// Magic bytes for format identification
    pub magic: [u8; 4],
    /// Schema version
    pub version: SchemaVersion,
    /// Chunk X coordinate
    pub x: i32,
    /// Chunk Y coordinate
    pub y: i32,
    /// Chunk Z coordinate
    pub z: i32,
    /// Compression type (0 = none, 1 = lz4)
    pub compression: u8,
}

impl ChunkHeader {
    /// Creates a new header for the given coordinate.
    #[must_use]
    pub fn new(coord: ChunkCoord) -> Self {
        Self {
            magic: MagicBytes::CHUNK.0,
            version: SchemaVersion::CHUNK_FILE,
            x: coord.x,
            y: coord.y,
            z: coord.z,
            compression: 1,
        }
    }

    /// Validates magic bytes and version.
    pub fn validate(&self) -> StoreResult<()> {
        if self.magic != MagicBytes::CHUNK.0 {
            return Err(StoreError::InvalidFormat);
        }
        if !SchemaVersion::CHUNK_FILE.can_read(&self.version) {
            return Err(StoreError::VersionMismatch {
                expected: SchemaVersion::CHUNK_FILE.to_string(),
                actual: self.version.to_string(),
            });
        }
        Ok(())
    }
}

/// Persisted chunk state: ownership plus the activator trigger table.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkBody {
    owner: PlayerId,
    activators: BTreeMap<LocalPos, Vec<String>>,
}

/// On-disk envelope: header plus lz4-compressed body.
#[derive(Debug, Serialize, Deserialize)]
struct ChunkFile {
    header: ChunkHeader,
    payload: Vec<u8>,
}

/// A chunk of the voxel world: the unit of persistence, caching, and
/// ownership.
///
/// The modified flag tracks divergence from the persisted copy; it is set by
/// every mutator and cleared only when a write-back succeeds, so a failed
/// write leaves the chunk eligible for retry on the next autosave pass.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Chunk coordinate
    coord: ChunkCoord,
    /// Owning player, or a sentinel (`NONE` unclaimed, `RESERVED` held)
    owner: PlayerId,
    /// Trigger messages keyed by voxel position within the chunk
    activators: BTreeMap<LocalPos, Vec<String>>,
    /// Whether the chunk has been modified since last save
    dirty: bool,
}

impl Chunk {
    /// Creates a new unclaimed chunk.
    #[must_use]
    pub fn new(coord: ChunkCoord) -> Self {
        Self {
            coord,
            owner: PlayerId::NONE,
            activators: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Returns the chunk coordinate.
    #[must_use]
    pub const fn coord(&self) -> ChunkCoord {
        self.coord
    }

    /// Returns the owning player id (possibly a sentinel).
    #[must_use]
    pub const fn owner(&self) -> PlayerId {
        self.owner
    }

    /// Sets the owner and marks the chunk modified.
    pub fn set_owner(&mut self, owner: PlayerId) {
        self.owner = owner;
        self.dirty = true;
    }

    /// Returns whether the chunk has unsaved modifications.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks the chunk modified.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clears the modified flag (call after a successful write-back).
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Appends a trigger message at the given voxel position.
    pub fn add_activator(&mut self, pos: LocalPos, message: String) {
        self.activators.entry(pos).or_default().push(message);
        self.dirty = true;
    }

    /// Removes all trigger messages at the given position.
    ///
    /// Returns `false` if no activator existed there (caller logs, no-op).
    pub fn clear_activator(&mut self, pos: LocalPos) -> bool {
        if self.activators.remove(&pos).is_some() {
            self.dirty = true;
            true
        } else {
            false
        }
    }

    /// Returns the trigger messages at a position, if any.
    #[must_use]
    pub fn activator_messages(&self, pos: LocalPos) -> Option<&[String]> {
        self.activators.get(&pos).map(Vec::as_slice)
    }

    /// Iterates all activators in position order.
    pub fn activators(&self) -> impl Iterator<Item = (LocalPos, &[String])> {
        self.activators.iter().map(|(pos, msgs)| (*pos, msgs.as_slice()))
    }

    /// Number of voxel positions carrying activators.
    #[must_use]
    pub fn activator_count(&self) -> usize {
        self.activators.len()
    }

    /// Serializes the chunk to its file format.
    pub fn serialize(&self) -> StoreResult<Vec<u8>> {
        let body = ChunkBody {
            owner: self.owner,
            activators: self.activators.clone(),
        };
        let raw = bincode::serialize(&body).map_err(|e| StoreError::Serialize(e.to_string()))?;
        let file = ChunkFile {
            header: ChunkHeader::new(self.coord),
            payload: lz4_flex::compress_prepend_size(&raw),
        };
        bincode::serialize(&file).map_err(|e| StoreError::Serialize(e.to_string()))
    }

    /// Deserializes a chunk from its file format.
    ///
    /// The returned chunk is clean: it matches the persisted copy.
    pub fn deserialize(bytes: &[u8]) -> StoreResult<Self> {
        let file: ChunkFile =
            bincode::deserialize(bytes).map_err(|e| StoreError::Deserialize(e.to_string()))?;
        file.header.validate()?;
        let raw = lz4_flex::decompress_size_prepended(&file.payload)
            .map_err(|e| StoreError::Deserialize(e.to_string()))?;
        let body: ChunkBody =
            bincode::deserialize(&raw).map_err(|e| StoreError::Deserialize(e.to_string()))?;
        Ok(Self {
            coord: ChunkCoord::new(file.header.x, file.header.y, file.header.z),
            owner: body.owner,
            activators: body.activators,
            dirty: false,
        })
    }
}
