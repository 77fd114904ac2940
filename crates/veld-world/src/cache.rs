//! In-memory chunk cache behind the World-domain lock.
//!
//! The cache owns every resident chunk. Residency is tracked by a single
//! map under the `World` lock; each resident chunk additionally carries its
//! own `Chunk`-domain lock for state mutation. Loading and creating on a
//! cache miss happens while the World lock is held, which is what makes the
//! first load/create of a coordinate observable exactly once system-wide:
//! no two live chunk objects for the same coordinate can coexist.

use ahash::AHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use veld_common::locks::{Domain, OrderedMutex, OrderedMutexGuard};
use veld_common::{ChunkCoord, WorldError, WorldResult};

use crate::chunk::Chunk;
use crate::store::ChunkStore;

/// A chunk resident in the cache.
pub struct CachedChunk {
    coord: ChunkCoord,
    /// Seconds since cache epoch of the last `find` touching this chunk.
    last_touched: AtomicU64,
    state: OrderedMutex<Chunk>,
}

impl CachedChunk {
    fn new(chunk: Chunk, now_secs: u64) -> Self {
        Self {
            coord: chunk.coord(),
            last_touched: AtomicU64::new(now_secs),
            state: OrderedMutex::new(Domain::Chunk, chunk),
        }
    }

    /// Returns the chunk coordinate.
    #[must_use]
    pub const fn coord(&self) -> ChunkCoord {
        self.coord
    }

    /// Locks the chunk state (Chunk domain).
    pub fn lock(&self) -> OrderedMutexGuard<'_, Chunk> {
        self.state.lock()
    }

    fn touch(&self, now_secs: u64) {
        self.last_touched.store(now_secs, Ordering::Relaxed);
    }

    fn idle_secs(&self, now_secs: u64) -> u64 {
        now_secs.saturating_sub(self.last_touched.load(Ordering::Relaxed))
    }
}

impl std::fmt::Debug for CachedChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedChunk")
            .field("coord", &self.coord)
            .finish_non_exhaustive()
    }
}

/// Process-wide chunk cache with lazy load and eviction.
pub struct ChunkCache {
    store: Arc<dyn ChunkStore>,
    /// When set, missing chunks are not created (`--no-create` mode).
    create_disabled: bool,
    epoch: Instant,
    resident: OrderedMutex<AHashMap<ChunkCoord, Arc<CachedChunk>>>,
}

impl ChunkCache {
    /// Creates a cache over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self::with_options(store, false)
    }

    /// Creates a cache, optionally with chunk creation disabled.
    #[must_use]
    pub fn with_options(store: Arc<dyn ChunkStore>, create_disabled: bool) -> Self {
        Self {
            store,
            create_disabled,
            epoch: Instant::now(),
            resident: OrderedMutex::new(Domain::World, AHashMap::new()),
        }
    }

    /// Returns the backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    fn now_secs(&self) -> u64 {
        self.epoch.elapsed().as_secs()
    }

    /// Finds the chunk at `coord`, loading it from the store on a miss and
    /// creating a fresh one if the store misses too.
    ///
    /// Fails with [`WorldError::CreationDisabled`] when the chunk does not
    /// exist anywhere and creation is inhibited.
    pub fn find(&self, coord: ChunkCoord) -> WorldResult<Arc<CachedChunk>> {
        let now = self.now_secs();
        let mut resident = self.resident.lock();
        if let Some(cached) = resident.get(&coord) {
            cached.touch(now);
            return Ok(Arc::clone(cached));
        }

        let chunk = match self.store.load(coord)? {
            Some(chunk) => {
                debug!("Loaded chunk {coord}");
                chunk
            }
            None if self.create_disabled => {
                return Err(WorldError::CreationDisabled { coord });
            }
            None => {
                debug!("Created chunk {coord}");
                self.store.create_default(coord)?
            }
        };

        let cached = Arc::new(CachedChunk::new(chunk, now));
        resident.insert(coord, Arc::clone(&cached));
        Ok(cached)
    }

    /// Returns the chunk only if it is already resident.
    #[must_use]
    pub fn find_resident(&self, coord: ChunkCoord) -> Option<Arc<CachedChunk>> {
        let resident = self.resident.lock();
        resident.get(&coord).map(|cached| {
            cached.touch(self.epoch.elapsed().as_secs());
            Arc::clone(cached)
        })
    }

    /// Removes a chunk from the cache without persisting it.
    pub fn remove(&self, coord: ChunkCoord) -> Option<Arc<CachedChunk>> {
        self.resident.lock().remove(&coord)
    }

    /// Destroys the resident chunk at `coord` and replaces it with a fresh
    /// one created from scratch, discarding any unsaved modifications.
    ///
    /// Backs the administrative `/territory revert` path.
    pub fn recreate(&self, coord: ChunkCoord) -> WorldResult<Arc<CachedChunk>> {
        let now = self.now_secs();
        let mut resident = self.resident.lock();
        resident.remove(&coord);
        let chunk = self.store.create_default(coord)?;
        let cached = Arc::new(CachedChunk::new(chunk, now));
        resident.insert(coord, Arc::clone(&cached));
        Ok(cached)
    }

    /// Persists the chunk if modified and clears its modified flag.
    ///
    /// Returns `true` if a write happened. A failed write leaves the flag
    /// set so the next autosave pass retries it.
    pub fn write_back(&self, cached: &CachedChunk) -> bool {
        let mut chunk = cached.lock();
        if !chunk.is_dirty() {
            return false;
        }
        match self.store.write(&chunk) {
            Ok(()) => {
                chunk.clear_dirty();
                true
            }
            Err(e) => {
                warn!("Failed to save chunk {}: {e}", cached.coord());
                false
            }
        }
    }

    /// Snapshot of all resident chunks for maintenance walks.
    #[must_use]
    pub fn resident_snapshot(&self) -> Vec<Arc<CachedChunk>> {
        self.resident.lock().values().map(Arc::clone).collect()
    }

    /// Number of resident chunks.
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.resident.lock().len()
    }

    /// Flushes every modified resident chunk. Returns the number saved.
    pub fn flush_all(&self) -> usize {
        let mut saved = 0;
        for cached in self.resident_snapshot() {
            if self.write_back(&cached) {
                saved += 1;
            }
        }
        saved
    }

    /// Evicts chunks idle for at least `idle_threshold`, flushing modified
    /// ones first. Returns the number evicted.
    ///
    /// Eviction serializes through each chunk's own lock, so a chunk in the
    /// middle of a claim/grant/revert is never pulled out underneath it; a
    /// chunk some worker still holds a reference to is skipped outright.
    pub fn purge_idle(&self, idle_threshold: Duration) -> usize {
        let now = self.now_secs();
        let mut resident = self.resident.lock();
        let candidates: Vec<ChunkCoord> = resident
            .iter()
            .filter(|(_, cached)| cached.idle_secs(now) >= idle_threshold.as_secs())
            .map(|(coord, _)| *coord)
            .collect();

        let mut evicted = 0;
        for coord in candidates {
            let Some(cached) = resident.get(&coord) else { continue };
            // Map reference only; anyone else holding the Arc may be about
            // to mutate, so leave the chunk resident.
            if Arc::strong_count(cached) != 1 {
                continue;
            }
            {
                let mut chunk = cached.lock();
                if chunk.is_dirty() {
                    match self.store.write(&chunk) {
                        Ok(()) => chunk.clear_dirty(),
                        Err(e) => {
                            warn!("Purge kept dirty chunk {coord}: {e}");
                            continue;
                        }
                    }
                }
            }
            resident.remove(&coord);
            evicted += 1;
        }
        if evicted > 0 {
            debug!("Purged {evicted} idle chunks");
        }
        evicted
    }
}

impl std::fmt::Debug for ChunkCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCache")
            .field("create_disabled", &self.create_disabled)
            .field("resident", &self.resident_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileChunkStore, MemoryChunkStore};
    use veld_common::PlayerId;

    fn cache() -> ChunkCache {
        ChunkCache::new(Arc::new(MemoryChunkStore::new()))
    }

    #[test]
    fn test_find_creates_exactly_once() {
        let cache = cache();
        let coord = ChunkCoord::new(0, 0, 0);
        let a = cache.find(coord).expect("find");
        let b = cache.find(coord).expect("find");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.resident_count(), 1);
    }

    #[test]
    fn test_find_loads_persisted_state() {
        let store = Arc::new(MemoryChunkStore::new());
        let mut chunk = Chunk::new(ChunkCoord::new(1, 1, 1));
        chunk.set_owner(PlayerId::from_raw(5));
        store.write(&chunk).expect("write");

        let cache = ChunkCache::new(store);
        let cached = cache.find(ChunkCoord::new(1, 1, 1)).expect("find");
        assert_eq!(cached.lock().owner(), PlayerId::from_raw(5));
    }

    #[test]
    fn test_creation_disabled() {
        let cache = ChunkCache::with_options(Arc::new(MemoryChunkStore::new()), true);
        let err = cache.find(ChunkCoord::new(9, 9, 9)).expect_err("must fail");
        assert!(matches!(err, WorldError::CreationDisabled { .. }));
        assert_eq!(cache.resident_count(), 0);
    }

    #[test]
    fn test_write_back_clears_dirty_and_retries_after_failure() {
        let store = Arc::new(MemoryChunkStore::new());
        let cache = ChunkCache::new(Arc::clone(&store) as Arc<dyn ChunkStore>);
        let cached = cache.find(ChunkCoord::new(0, 0, 0)).expect("find");

        cached.lock().set_owner(PlayerId::from_raw(2));

        store.set_fail_writes(true);
        assert!(!cache.write_back(&cached));
        assert!(cached.lock().is_dirty(), "failed write must keep the flag");

        store.set_fail_writes(false);
        assert!(cache.write_back(&cached));
        assert!(!cached.lock().is_dirty());
        // Clean chunks are not rewritten.
        assert!(!cache.write_back(&cached));
    }

    #[test]
    fn test_recreate_discards_unsaved_state() {
        let cache = cache();
        let coord = ChunkCoord::new(2, 2, 2);
        let old = cache.find(coord).expect("find");
        old.lock().set_owner(PlayerId::from_raw(7));
        drop(old);

        let fresh = cache.recreate(coord).expect("recreate");
        assert_eq!(fresh.lock().owner(), PlayerId::NONE);
        assert_eq!(fresh.lock().activator_count(), 0);
        assert!(!fresh.lock().is_dirty());

        // The replacement is the one the cache now hands out.
        let found = cache.find(coord).expect("find");
        assert!(Arc::ptr_eq(&fresh, &found));
    }

    #[test]
    fn test_purge_evicts_idle_flushes_dirty() {
        let store = Arc::new(MemoryChunkStore::new());
        let cache = ChunkCache::new(Arc::clone(&store) as Arc<dyn ChunkStore>);
        let coord = ChunkCoord::new(3, 0, 0);
        {
            let cached = cache.find(coord).expect("find");
            cached.lock().set_owner(PlayerId::from_raw(4));
        }
        assert_eq!(cache.purge_idle(Duration::ZERO), 1);
        assert_eq!(cache.resident_count(), 0);

        // The flush happened before eviction.
        let reloaded = store.load(coord).expect("load").expect("present");
        assert_eq!(reloaded.owner(), PlayerId::from_raw(4));
    }

    #[test]
    fn test_purge_skips_referenced_and_recent_chunks() {
        let cache = cache();
        let held = cache.find(ChunkCoord::new(0, 0, 0)).expect("find");
        assert_eq!(cache.purge_idle(Duration::ZERO), 0, "held Arc blocks eviction");
        drop(held);

        let _ = cache.find(ChunkCoord::new(1, 0, 0)).expect("find");
        assert_eq!(
            cache.purge_idle(Duration::from_secs(3600)),
            0,
            "recently touched chunks stay"
        );
    }

    #[test]
    fn test_purge_keeps_dirty_chunk_on_write_failure() {
        let store = Arc::new(MemoryChunkStore::new());
        let cache = ChunkCache::new(Arc::clone(&store) as Arc<dyn ChunkStore>);
        {
            let cached = cache.find(ChunkCoord::new(0, 0, 0)).expect("find");
            cached.lock().set_owner(PlayerId::from_raw(8));
        }
        store.set_fail_writes(true);
        assert_eq!(cache.purge_idle(Duration::ZERO), 0);
        assert_eq!(cache.resident_count(), 1, "unsaveable chunk must stay resident");
    }

    #[test]
    fn test_concurrent_find_yields_one_object() {
        let cache = Arc::new(ChunkCache::new(Arc::new(MemoryChunkStore::new())));
        let coord = ChunkCoord::new(5, 5, 5);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || cache.find(coord).expect("find")));
        }
        let arcs: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .collect();
        for pair in arcs.windows(2) {
            assert!(Arc::ptr_eq(&pair[0], &pair[1]));
        }
        assert_eq!(cache.resident_count(), 1);
    }

    #[test]
    fn test_file_backed_cache_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let coord = ChunkCoord::new(-1, 2, -3);
        {
            let cache = ChunkCache::new(Arc::new(FileChunkStore::new(dir.path())));
            let cached = cache.find(coord).expect("find");
            cached.lock().set_owner(PlayerId::from_raw(12));
            assert!(cache.write_back(&cached));
        }
        // A new cache over the same directory sees the persisted owner.
        let cache = ChunkCache::new(Arc::new(FileChunkStore::new(dir.path())));
        let cached = cache.find(coord).expect("find");
        assert_eq!(cached.lock().owner(), PlayerId::from_raw(12));
    }
}
