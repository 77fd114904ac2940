//! One-shot maintenance actions.
//!
//! Each runs without starting the server and exits immediately: account
//! creation, on-disk chunk file conversion, and a quick in-memory self-test
//! of the claim rules.

use anyhow::{bail, ensure, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use veld_common::{ChunkCoord, PlayerId};
use veld_gameplay::player::{create_account, PlayerStore};
use veld_gameplay::territory::ClaimError;
use veld_gameplay::{Player, TerritoryManager};
use veld_gameplay::player::MemoryPlayerStore;
use veld_world::{ChunkCache, ChunkStore, FileChunkStore, MemoryChunkStore};

/// Creates an account from a `NAME,PASSWORD[,ADMIN]` spec.
pub fn create_user(players: &dyn PlayerStore, spec: &str, default_max_chunks: usize) -> Result<()> {
    let mut parts = spec.splitn(3, ',');
    let (Some(name), Some(password)) = (parts.next(), parts.next()) else {
        bail!("expected NAME,PASSWORD[,ADMIN]");
    };
    let admin_level: u8 = match parts.next() {
        Some(raw) => raw.trim().parse().context("bad admin level")?,
        None => 0,
    };
    let record = create_account(
        players,
        name.trim(),
        password,
        admin_level,
        default_max_chunks,
    )?;
    info!("Created player {} with id {}", record.name, record.id);
    Ok(())
}

/// Rewrites every on-disk chunk file in the current format, dropping files
/// for chunks that were never touched (no owner, no activators).
pub fn convert_chunks(dir: &Path) -> Result<()> {
    let store = FileChunkStore::new(dir);
    let mut kept = 0usize;
    let mut dropped = 0usize;
    for coord in store.stored_coords()? {
        let Some(chunk) = store.load(coord)? else {
            continue;
        };
        if chunk.owner() == PlayerId::NONE && chunk.activator_count() == 0 {
            store.remove(coord)?;
            dropped += 1;
        } else {
            store.write(&chunk)?;
            kept += 1;
        }
    }
    info!("Rewrote {kept} chunk files, dropped {dropped} untouched ones");
    Ok(())
}

/// Runs the claim scenario against in-memory stores.
pub fn self_test() -> Result<()> {
    let cache = Arc::new(ChunkCache::new(
        Arc::new(MemoryChunkStore::new()) as Arc<dyn ChunkStore>
    ));
    let players = Arc::new(MemoryPlayerStore::new());
    let manager = TerritoryManager::new(
        Arc::clone(&cache),
        Arc::clone(&players) as Arc<dyn PlayerStore>,
    );

    let record = create_account(players.as_ref(), "selftest", "", 0, 5)?;
    let (tx, _rx) = mpsc::unbounded_channel();
    let player = Player::from_record(&record, tx);
    player.lock().level = 100;

    let first = manager.claim(&player, None)?;
    ensure!(
        first == ChunkCoord::new(0, 0, 0),
        "unexpected first claim target {first}"
    );
    ensure!(
        cache.find(first)?.lock().owner() == record.id,
        "claim did not set the chunk owner"
    );

    player.lock().coord = ChunkCoord::new(5, 5, 5).to_world();
    ensure!(
        matches!(manager.claim(&player, None), Err(ClaimError::NotAdjacent)),
        "non-adjacent claim must be denied"
    );

    player.lock().coord = ChunkCoord::new(1, 0, 0).to_world();
    manager.claim(&player, None)?;
    ensure!(
        player.lock().territory.len() == 2,
        "territory cache out of step"
    );

    info!("Self-test passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use veld_common::LocalPos;
    use veld_world::Chunk;

    #[test]
    fn test_self_test_passes() {
        self_test().expect("self test");
    }

    #[test]
    fn test_create_user_specs() {
        let players = MemoryPlayerStore::new();
        create_user(&players, "ada,sesame,5", 10).expect("create");
        let record = players.load("ada").expect("load").expect("present");
        assert_eq!(record.admin_level, 5);
        assert_eq!(record.max_chunks, 10);

        create_user(&players, "bea,pw", 10).expect("create without admin");
        assert_eq!(
            players.load("bea").expect("load").expect("present").admin_level,
            0
        );

        assert!(create_user(&players, "noname", 10).is_err());
        assert!(create_user(&players, "ada,again", 10).is_err(), "name taken");
    }

    #[test]
    fn test_convert_chunks_drops_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileChunkStore::new(dir.path());

        // One untouched chunk, one owned, one with an activator.
        store.create_default(ChunkCoord::new(0, 0, 0)).expect("create");
        let mut owned = Chunk::new(ChunkCoord::new(1, 0, 0));
        owned.set_owner(PlayerId::from_raw(3));
        store.write(&owned).expect("write");
        let mut marked = Chunk::new(ChunkCoord::new(2, 0, 0));
        marked.add_activator(LocalPos::new(0, 0, 0), "keep me".into());
        store.write(&marked).expect("write");

        convert_chunks(dir.path()).expect("convert");

        let mut coords = store.stored_coords().expect("list");
        coords.sort_by_key(|c| c.x);
        assert_eq!(
            coords,
            vec![ChunkCoord::new(1, 0, 0), ChunkCoord::new(2, 0, 0)]
        );
    }
}
