//! Player sessions, persisted records, and the account collaborator.

use ahash::AHashMap;
use glam::DVec3;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;
use veld_common::locks::{Domain, OrderedMutex, OrderedMutexGuard};
use veld_common::{ChunkCoord, PlayerId, SchemaVersion, StoreError, StoreResult};

/// Admin level required for `/territory grant`.
pub const ADMIN_LEVEL_GRANT: u8 = 5;

/// Admin level required for `/shutdown` and `/level`.
pub const ADMIN_LEVEL_OPS: u8 = 8;

/// Admin level required for `/territory revert`.
pub const ADMIN_LEVEL_REVERT: u8 = 10;

/// Connection-state machine for a session: Login → Password → In.
///
/// Transitions are driven by the authentication flow in the connection
/// worker; only `In` sessions are eligible for gameplay commands, spatial
/// indexing, and message delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnState {
    /// Waiting for the player name.
    Login = 0,
    /// Name accepted, waiting for the password.
    Password = 1,
    /// Authenticated and in the world.
    In = 2,
}

impl ConnState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Password,
            2 => Self::In,
            _ => Self::Login,
        }
    }

    /// Whether the session is in the world.
    #[must_use]
    pub const fn is_in(self) -> bool {
        matches!(self, Self::In)
    }
}

/// Sender half of a session's outbound message queue.
///
/// Enqueueing never blocks, so it is safe to call while holding any lock;
/// the paired per-connection writer task performs the actual network I/O
/// with no locks held.
pub type Outbox = mpsc::UnboundedSender<String>;

/// Mutable per-session state, guarded by the `User`-domain lock.
#[derive(Debug, Clone)]
pub struct PlayerState {
    /// Admin privilege tier (0 normal .. 10 super-admin)
    pub admin_level: u8,
    /// Character level, gates claiming dangerous areas
    pub level: u32,
    /// Current world position
    pub coord: DVec3,
    /// Home spawn point (`/home`, `/sethome`)
    pub home: DVec3,
    /// Revive spawn point
    pub revive: DVec3,
    /// Whether the player is currently dead
    pub dead: bool,
    /// Cached list of owned chunks; the chunk record stays authoritative
    pub territory: Vec<ChunkCoord>,
    /// Maximum chunks a non-admin may claim
    pub max_chunks: usize,
    /// Friend names (informational)
    pub friends: Vec<String>,
    /// Stored password, carried so the session can be re-persisted whole
    password: String,
}

/// A live player session.
///
/// Owned by the `PlayerRegistry` between login and disconnect. The name and
/// id are immutable for the session's lifetime; the connection state is
/// atomic so enumeration paths can read it without taking the `User` lock.
pub struct Player {
    id: PlayerId,
    name: String,
    conn_state: AtomicU8,
    outbox: Outbox,
    state: OrderedMutex<PlayerState>,
}

impl Player {
    /// Creates a session from a persisted record.
    #[must_use]
    pub fn from_record(record: &PlayerRecord, outbox: Outbox) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            conn_state: AtomicU8::new(ConnState::Login as u8),
            outbox,
            state: OrderedMutex::new(
                Domain::User,
                PlayerState {
                    admin_level: record.admin_level,
                    level: record.level,
                    coord: record.coord.into(),
                    home: record.home.into(),
                    revive: record.revive.into(),
                    dead: false,
                    territory: record.territory.clone(),
                    max_chunks: record.max_chunks,
                    friends: record.friends.clone(),
                    password: record.password.clone(),
                },
            ),
        }
    }

    /// Returns the stable player id.
    #[must_use]
    pub const fn id(&self) -> PlayerId {
        self.id
    }

    /// Returns the player name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn conn_state(&self) -> ConnState {
        ConnState::from_u8(self.conn_state.load(Ordering::Acquire))
    }

    /// Advances the connection state.
    pub fn set_conn_state(&self, state: ConnState) {
        self.conn_state.store(state as u8, Ordering::Release);
    }

    /// Whether the session is in the world.
    #[must_use]
    pub fn is_in(&self) -> bool {
        self.conn_state().is_in()
    }

    /// Locks the mutable session state (`User` domain).
    pub fn lock(&self) -> OrderedMutexGuard<'_, PlayerState> {
        self.state.lock()
    }

    /// Enqueues a line for delivery to this player's client.
    ///
    /// A closed outbox means the client is gone; the line is dropped.
    pub fn send(&self, line: impl Into<String>) {
        let _ = self.outbox.send(line.into());
    }

    /// Enqueues an informational line (original `!` prefix convention).
    pub fn info(&self, msg: impl AsRef<str>) {
        self.send(format!("!{}", msg.as_ref()));
    }

    /// Enqueues a failure line (original `#FAIL` prefix convention).
    pub fn fail(&self, msg: impl AsRef<str>) {
        self.send(format!("#FAIL {}", msg.as_ref()));
    }

    /// Snapshots the session into a persistable record.
    pub fn to_record(&self) -> PlayerRecord {
        let state = self.lock();
        PlayerRecord {
            version: SchemaVersion::PLAYER_RECORD,
            id: self.id,
            name: self.name.clone(),
            password: state.password.clone(),
            admin_level: state.admin_level,
            level: state.level,
            coord: state.coord.into(),
            home: state.home.into(),
            revive: state.revive.into(),
            territory: state.territory.clone(),
            max_chunks: state.max_chunks,
            friends: state.friends.clone(),
        }
    }

    /// Checks the stored password. Constant-time comparison is not a goal
    /// here; accounts are a boundary collaborator.
    #[must_use]
    pub fn password_matches(&self, attempt: &str) -> bool {
        self.lock().password == attempt
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("conn_state", &self.conn_state())
            .finish_non_exhaustive()
    }
}

/// Persisted form of a player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerRecord {
    /// Record schema version
    pub version: SchemaVersion,
    /// Stable store-assigned id
    pub id: PlayerId,
    /// Unique name (uniqueness is case-insensitive)
    pub name: String,
    /// Stored password
    pub password: String,
    /// Admin privilege tier
    pub admin_level: u8,
    /// Character level
    pub level: u32,
    /// Last position
    pub coord: [f64; 3],
    /// Home spawn point
    pub home: [f64; 3],
    /// Revive spawn point
    pub revive: [f64; 3],
    /// Owned-chunk cache
    pub territory: Vec<ChunkCoord>,
    /// Claim quota
    pub max_chunks: usize,
    /// Friend names
    pub friends: Vec<String>,
}

/// Account/ID collaborator: persisted player records plus the atomic
/// id counter (increment-and-fetch, then insert keyed by the new id).
pub trait PlayerStore: Send + Sync {
    /// Allocates the next player id.
    fn next_id(&self) -> StoreResult<PlayerId>;

    /// Loads a record by name (case-insensitive).
    fn load(&self, name: &str) -> StoreResult<Option<PlayerRecord>>;

    /// Persists a record.
    fn save(&self, record: &PlayerRecord) -> StoreResult<()>;
}

/// Errors from account creation.
#[derive(Debug, Error)]
pub enum AccountError {
    /// The name is already taken
    #[error("Player name '{0}' is already taken")]
    NameTaken(String),
    /// The store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Creates a new account: allocates an id through the counter, then inserts
/// the record.
pub fn create_account(
    store: &dyn PlayerStore,
    name: &str,
    password: &str,
    admin_level: u8,
    max_chunks: usize,
) -> Result<PlayerRecord, AccountError> {
    if store.load(name)?.is_some() {
        return Err(AccountError::NameTaken(name.to_string()));
    }
    let id = store.next_id()?;
    let record = PlayerRecord {
        version: SchemaVersion::PLAYER_RECORD,
        id,
        name: name.to_string(),
        password: password.to_string(),
        admin_level,
        level: 0,
        coord: [0.0; 3],
        home: [0.0; 3],
        revive: [0.0; 3],
        territory: Vec::new(),
        max_chunks,
        friends: Vec::new(),
    };
    store.save(&record)?;
    Ok(record)
}

/// File-backed player store: one JSON record per player plus a counter file.
#[derive(Debug)]
pub struct FilePlayerStore {
    dir: PathBuf,
    counter: Mutex<u32>,
}

impl FilePlayerStore {
    /// Opens (or initializes) a store rooted at the given directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let counter_path = dir.join("id_counter");
        let counter = if counter_path.exists() {
            std::fs::read_to_string(&counter_path)?
                .trim()
                .parse()
                .map_err(|e| StoreError::Deserialize(format!("bad id counter: {e}")))?
        } else {
            0
        };
        Ok(Self {
            dir,
            counter: Mutex::new(counter),
        })
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name.to_lowercase()))
    }
}

impl PlayerStore for FilePlayerStore {
    fn next_id(&self) -> StoreResult<PlayerId> {
        let mut counter = self.counter.lock();
        *counter += 1;
        std::fs::write(self.dir.join("id_counter"), counter.to_string())?;
        Ok(PlayerId::from_raw(*counter))
    }

    fn load(&self, name: &str) -> StoreResult<Option<PlayerRecord>> {
        let path = self.record_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        let record = serde_json::from_str(&data)
            .map_err(|e| StoreError::Deserialize(e.to_string()))?;
        Ok(Some(record))
    }

    fn save(&self, record: &PlayerRecord) -> StoreResult<()> {
        let data = serde_json::to_string_pretty(record)
            .map_err(|e| StoreError::Serialize(e.to_string()))?;
        std::fs::write(self.record_path(&record.name), data)?;
        Ok(())
    }
}

/// In-memory player store for tests.
#[derive(Debug, Default)]
pub struct MemoryPlayerStore {
    records: Mutex<AHashMap<String, PlayerRecord>>,
    counter: Mutex<u32>,
}

impl MemoryPlayerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlayerStore for MemoryPlayerStore {
    fn next_id(&self) -> StoreResult<PlayerId> {
        let mut counter = self.counter.lock();
        *counter += 1;
        Ok(PlayerId::from_raw(*counter))
    }

    fn load(&self, name: &str) -> StoreResult<Option<PlayerRecord>> {
        Ok(self.records.lock().get(&name.to_lowercase()).cloned())
    }

    fn save(&self, record: &PlayerRecord) -> StoreResult<()> {
        self.records
            .lock()
            .insert(record.name.to_lowercase(), record.clone());
        Ok(())
    }
}

/// Saves a player record, logging instead of failing: persistence problems
/// are best-effort at gameplay time and retried on the next save point.
pub fn save_player_best_effort(store: &dyn PlayerStore, player: &Player) {
    let record = player.to_record();
    if let Err(e) = store.save(&record) {
        warn!("Failed to save player {}: {e}", player.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbox() -> (Outbox, mpsc::UnboundedReceiver<String>) {
        mpsc::unbounded_channel()
    }

    fn test_record(name: &str, id: u32) -> PlayerRecord {
        PlayerRecord {
            version: SchemaVersion::PLAYER_RECORD,
            id: PlayerId::from_raw(id),
            name: name.to_string(),
            password: "secret".into(),
            admin_level: 0,
            level: 3,
            coord: [10.0, 20.0, 30.0],
            home: [0.0; 3],
            revive: [0.0; 3],
            territory: vec![ChunkCoord::new(0, 0, 0)],
            max_chunks: 5,
            friends: vec!["ally".into()],
        }
    }

    #[test]
    fn test_conn_state_machine() {
        let (tx, _rx) = outbox();
        let player = Player::from_record(&test_record("ada", 1), tx);
        assert_eq!(player.conn_state(), ConnState::Login);
        assert!(!player.is_in());
        player.set_conn_state(ConnState::Password);
        player.set_conn_state(ConnState::In);
        assert!(player.is_in());
    }

    #[test]
    fn test_send_conventions() {
        let (tx, mut rx) = outbox();
        let player = Player::from_record(&test_record("ada", 1), tx);
        player.info("welcome");
        player.fail("nope");
        assert_eq!(rx.try_recv().expect("line"), "!welcome");
        assert_eq!(rx.try_recv().expect("line"), "#FAIL nope");
    }

    #[test]
    fn test_record_round_trip_through_session() {
        let (tx, _rx) = outbox();
        let record = test_record("ada", 7);
        let player = Player::from_record(&record, tx);
        {
            let mut state = player.lock();
            state.level = 9;
            state.territory.push(ChunkCoord::new(1, 0, 0));
        }
        let out = player.to_record();
        assert_eq!(out.id, record.id);
        assert_eq!(out.name, "ada");
        assert_eq!(out.password, "secret");
        assert_eq!(out.level, 9);
        assert_eq!(out.territory.len(), 2);
    }

    #[test]
    fn test_create_account_allocates_sequential_ids() {
        let store = MemoryPlayerStore::new();
        let a = create_account(&store, "first", "pw", 0, 10).expect("create");
        let b = create_account(&store, "second", "pw", 0, 10).expect("create");
        assert_eq!(a.id, PlayerId::from_raw(1));
        assert_eq!(b.id, PlayerId::from_raw(2));
        assert!(matches!(
            create_account(&store, "First", "pw", 0, 10),
            Err(AccountError::NameTaken(_))
        ));
    }

    #[test]
    fn test_file_store_persists_counter_and_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = FilePlayerStore::open(dir.path()).expect("open");
            let record = create_account(&store, "Bea", "pw", 2, 8).expect("create");
            assert_eq!(record.id, PlayerId::from_raw(1));
        }
        // Re-open: counter continues, lookup is case-insensitive.
        let store = FilePlayerStore::open(dir.path()).expect("open");
        assert_eq!(store.next_id().expect("next"), PlayerId::from_raw(2));
        let loaded = store.load("bea").expect("load").expect("present");
        assert_eq!(loaded.name, "Bea");
        assert_eq!(loaded.admin_level, 2);
    }
}
