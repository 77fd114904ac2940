//! # Veld Server
//!
//! Persistent multiplayer voxel world server. Ties together the crates:
//! - Common: coordinates, ids, the lock-hierarchy discipline
//! - World: chunk persistence, cache, maintenance passes
//! - Gameplay: sessions, registry, spatial index, territory, monsters
//!
//! All shared services are built here and passed down as `Arc`s; there is
//! no ambient global state.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

mod command;
mod config;
mod net;
mod ops;
mod services;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use veld_gameplay::monster;
use veld_gameplay::player::{save_player_best_effort, FilePlayerStore, PlayerStore};
use veld_world::maintenance;
use veld_world::{ChunkStore, FileChunkStore};

use crate::config::ServerConfig;
use crate::services::Services;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "veld-server", about = "Persistent multiplayer voxel world server")]
struct Args {
    /// Path to the config file
    #[arg(long, default_value = "veld.toml")]
    config: PathBuf,

    /// Override the configured listen address
    #[arg(long)]
    listen: Option<String>,

    /// Allow passwordless testN logins
    #[arg(long)]
    allow_test_users: bool,

    /// Never create chunks missing from the store
    #[arg(long)]
    no_create: bool,

    /// Create an account and exit: NAME,PASSWORD[,ADMIN]
    #[arg(long, value_name = "SPEC")]
    create_user: Option<String>,

    /// Rewrite on-disk chunk files and exit
    #[arg(long)]
    convert_chunks: bool,

    /// Run an in-memory self-test and exit
    #[arg(long)]
    self_test: bool,
}

/// Main entry point.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("veld_server=info".parse()?)
                .add_directive("veld_world=info".parse()?)
                .add_directive("veld_gameplay=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut config = ServerConfig::load_from(&args.config);
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if args.allow_test_users {
        config.allow_test_users = true;
    }
    if args.no_create {
        config.inhibit_chunk_creation = true;
    }

    if args.self_test {
        return ops::self_test();
    }

    let data_dir = PathBuf::from(&config.data_dir);
    if args.convert_chunks {
        return ops::convert_chunks(&data_dir.join("chunks"));
    }

    let players: Arc<dyn PlayerStore> = Arc::new(FilePlayerStore::open(data_dir.join("players"))?);
    if let Some(spec) = args.create_user {
        return ops::create_user(players.as_ref(), &spec, config.default_max_chunks);
    }

    info!("Veld server starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let chunk_store: Arc<dyn ChunkStore> = Arc::new(FileChunkStore::new(data_dir.join("chunks")));
    let services = Arc::new(Services::new(config, chunk_store, players));

    let autosave = tokio::spawn(maintenance::autosave_worker(
        Arc::clone(&services.cache),
        Duration::from_secs(services.config.autosave_interval_secs),
        services.shutdown_receiver(),
    ));
    let purge = tokio::spawn(maintenance::purge_worker(
        Arc::clone(&services.cache),
        Duration::from_secs(services.config.purge_interval_secs),
        Duration::from_secs(services.config.chunk_idle_secs),
        services.shutdown_receiver(),
    ));
    let monsters = tokio::spawn(monster::simulation_worker(
        Arc::clone(&services.monsters),
        Arc::clone(&services.spatial),
        Arc::clone(&services.registry),
        Duration::from_millis(services.config.monster_tick_ms),
        services.config.monster_population,
        services.shutdown_receiver(),
    ));

    let listener = TcpListener::bind(&services.config.listen_addr).await?;
    info!("Listening on {}", services.config.listen_addr);

    tokio::select! {
        () = net::serve(Arc::clone(&services), listener) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received");
        }
    }
    services.request_shutdown();

    // Flush player state; the autosave worker does its final chunk flush as
    // it winds down.
    for player in services.registry.snapshot() {
        save_player_best_effort(services.players.as_ref(), &player);
    }
    let _ = tokio::join!(autosave, purge, monsters);

    info!("Veld server shutdown complete");
    Ok(())
}
