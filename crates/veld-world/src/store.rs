//! Chunk persistence collaborators.
//!
//! The world core treats chunk storage as an external key-value collaborator
//! keyed by chunk coordinate. [`FileChunkStore`] is the production backend
//! (one file per chunk under a save directory); [`MemoryChunkStore`] backs
//! tests and the self-test action.

use ahash::AHashMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};
use veld_common::{ChunkCoord, StoreError, StoreResult};

use crate::chunk::Chunk;

/// Persistence collaborator for chunks.
pub trait ChunkStore: Send + Sync {
    /// Loads a chunk, or `None` if the store has no record for the coordinate.
    fn load(&self, coord: ChunkCoord) -> StoreResult<Option<Chunk>>;

    /// Creates a fresh default chunk at the coordinate and persists it.
    fn create_default(&self, coord: ChunkCoord) -> StoreResult<Chunk>;

    /// Writes a chunk's full state (owner, flags, trigger table).
    fn write(&self, chunk: &Chunk) -> StoreResult<()>;
}

/// File-backed chunk store: one file per chunk coordinate.
#[derive(Debug)]
pub struct FileChunkStore {
    dir: PathBuf,
}

impl FileChunkStore {
    /// Creates a store rooted at the given directory.
    #[must_use]
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Returns the file path for a chunk.
    #[must_use]
    pub fn chunk_path(&self, coord: ChunkCoord) -> PathBuf {
        self.dir
            .join(format!("chunk_{}_{}_{}.vlch", coord.x, coord.y, coord.z))
    }

    /// Lists the coordinates of every chunk file under the store directory.
    ///
    /// Used by the offline `--convert-chunks` maintenance action.
    pub fn stored_coords(&self) -> StoreResult<Vec<ChunkCoord>> {
        let mut coords = Vec::new();
        if !self.dir.exists() {
            return Ok(coords);
        }
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(coord) = parse_chunk_file_name(name) else {
                debug!("Skipping {name}, not a chunk file");
                continue;
            };
            coords.push(coord);
        }
        Ok(coords)
    }

    /// Removes a chunk file if present.
    pub fn remove(&self, coord: ChunkCoord) -> StoreResult<()> {
        let path = self.chunk_path(coord);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

fn parse_chunk_file_name(name: &str) -> Option<ChunkCoord> {
    let rest = name.strip_prefix("chunk_")?.strip_suffix(".vlch")?;
    let mut parts = rest.splitn(3, '_');
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    let z = parts.next()?.parse().ok()?;
    Some(ChunkCoord::new(x, y, z))
}

impl ChunkStore for FileChunkStore {
    fn load(&self, coord: ChunkCoord) -> StoreResult<Option<Chunk>> {
        let path = self.chunk_path(coord);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        Chunk::deserialize(&bytes).map(Some)
    }

    fn create_default(&self, coord: ChunkCoord) -> StoreResult<Chunk> {
        let chunk = Chunk::new(coord);
        self.write(&chunk)?;
        Ok(chunk)
    }

    fn write(&self, chunk: &Chunk) -> StoreResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let bytes = chunk.serialize()?;
        std::fs::write(self.chunk_path(chunk.coord()), bytes)?;
        Ok(())
    }
}

/// In-memory chunk store for tests.
///
/// Stores serialized bytes so tests exercise the same round-trip as the file
/// backend. Writes can be failed on demand to test the best-effort retry
/// policy.
#[derive(Debug, Default)]
pub struct MemoryChunkStore {
    chunks: Mutex<AHashMap<ChunkCoord, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryChunkStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn load(&self, coord: ChunkCoord) -> StoreResult<Option<Chunk>> {
        match self.chunks.lock().get(&coord) {
            Some(bytes) => Chunk::deserialize(bytes).map(Some),
            None => Ok(None),
        }
    }

    fn create_default(&self, coord: ChunkCoord) -> StoreResult<Chunk> {
        let chunk = Chunk::new(coord);
        self.write(&chunk)?;
        Ok(chunk)
    }

    fn write(&self, chunk: &Chunk) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            warn!("Simulated write failure for chunk {}", chunk.coord());
            return Err(StoreError::Io(std::io::Error::other("simulated failure")));
        }
        let bytes = chunk.serialize()?;
        self.chunks.lock().insert(chunk.coord(), bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veld_common::{LocalPos, PlayerId};

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileChunkStore::new(dir.path());
        let coord = ChunkCoord::new(2, -3, 5);

        assert!(store.load(coord).expect("load").is_none());

        let mut chunk = store.create_default(coord).expect("create");
        chunk.set_owner(PlayerId::from_raw(3));
        chunk.add_activator(LocalPos::new(1, 2, 3), "trip wire".into());
        store.write(&chunk).expect("write");

        let loaded = store.load(coord).expect("load").expect("present");
        assert_eq!(loaded.owner(), PlayerId::from_raw(3));
        assert_eq!(
            loaded.activator_messages(LocalPos::new(1, 2, 3)),
            Some(&["trip wire".to_string()][..])
        );
    }

    #[test]
    fn test_file_store_lists_coords() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileChunkStore::new(dir.path());
        store.create_default(ChunkCoord::new(0, 0, 0)).expect("create");
        store.create_default(ChunkCoord::new(-1, 4, 2)).expect("create");
        // A stray file should be skipped, not fail the listing.
        std::fs::write(dir.path().join("notes.txt"), b"hi").expect("write");

        let mut coords = store.stored_coords().expect("list");
        coords.sort_by_key(|c| (c.x, c.y, c.z));
        assert_eq!(
            coords,
            vec![ChunkCoord::new(-1, 4, 2), ChunkCoord::new(0, 0, 0)]
        );
    }

    #[test]
    fn test_chunk_file_name_parse() {
        assert_eq!(
            parse_chunk_file_name("chunk_1_-2_3.vlch"),
            Some(ChunkCoord::new(1, -2, 3))
        );
        assert_eq!(parse_chunk_file_name("chunk_1_2.vlch"), None);
        assert_eq!(parse_chunk_file_name("other.vlch"), None);
    }

    #[test]
    fn test_memory_store_failed_write() {
        let store = MemoryChunkStore::new();
        let chunk = Chunk::new(ChunkCoord::new(0, 0, 0));
        store.set_fail_writes(true);
        assert!(store.write(&chunk).is_err());
        assert!(store.is_empty());
        store.set_fail_writes(false);
        assert!(store.write(&chunk).is_ok());
        assert_eq!(store.len(), 1);
    }
}
