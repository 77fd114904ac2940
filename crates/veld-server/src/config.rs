//! Server configuration.
//!
//! All knobs the operator can turn, loaded from a TOML file with defaults
//! for anything missing. A broken or absent file falls back to defaults so
//! the server always comes up.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{info, warn};

/// Server configuration parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // === Network ===
    /// Listen address for client connections
    pub listen_addr: String,
    /// Message sent to every client on connect
    pub welcome: String,

    // === Storage ===
    /// Directory holding chunk files and player records
    pub data_dir: String,

    // === Maintenance ===
    /// Seconds between autosave passes
    pub autosave_interval_secs: u64,
    /// Seconds between purge passes
    pub purge_interval_secs: u64,
    /// Seconds a chunk must sit untouched before it is evicted
    pub chunk_idle_secs: u64,

    // === Monsters ===
    /// Milliseconds between monster simulation ticks
    pub monster_tick_ms: u64,
    /// Monsters kept alive while players are in the world
    pub monster_population: usize,

    // === Gameplay ===
    /// Radius of `/say` in world units
    pub say_radius: f64,
    /// Claim quota for new accounts
    pub default_max_chunks: usize,
    /// Allow passwordless `testN` logins
    pub allow_test_users: bool,
    /// Never create chunks missing from the store
    pub inhibit_chunk_creation: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // Network
            listen_addr: "0.0.0.0:57862".to_string(),
            welcome: "Welcome to the Veld world".to_string(),

            // Storage
            data_dir: "data".to_string(),

            // Maintenance
            autosave_interval_secs: 300,
            purge_interval_secs: 60,
            chunk_idle_secs: 600,

            // Monsters
            monster_tick_ms: 500,
            monster_population: 20,

            // Gameplay
            say_radius: 40.0,
            default_max_chunks: 10,
            allow_test_users: false,
            inhibit_chunk_creation: false,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a path, falling back to defaults if the file
    /// is missing or invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file: {e}");
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read config file: {e}");
                Self::default()
            }
        }
    }

    /// Saves the configuration to a path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, contents)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }
}
