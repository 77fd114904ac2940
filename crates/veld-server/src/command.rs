//! Text-command dispatch.
//!
//! Each client line is split on the first space into a command token and an
//! argument remainder. Malformed or unauthorized input answers with a
//! `#FAIL` line and never takes the connection worker down.

use glam::DVec3;
use tracing::info;
use veld_common::{ChunkCoord, Direction, LocalPos, PlayerId};
use veld_gameplay::player::{save_player_best_effort, ADMIN_LEVEL_OPS};
use veld_gameplay::spatial::EntityRef;
use veld_gameplay::Player;

use crate::services::Services;

/// Handles one command line from an in-world session.
pub fn dispatch(services: &Services, player: &Player, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
    match cmd {
        "/territory" => territory(services, player, rest),
        "/home" => {
            let home = player.lock().home;
            teleport(services, player, home);
            player.info("You are home");
        }
        "/sethome" => sethome(services, player),
        "/friend" => friend(services, player, rest),
        "/tell" => tell(services, player, rest),
        "/say" => say(services, player, rest),
        "/players" => list_players(services, player),
        "/activator" => activator(services, player, rest),
        "/revive" => revive(services, player),
        "/level" => set_level(services, player, rest),
        "/status" => status(services, player),
        "/shutdown" => shutdown(services, player),
        _ => player.fail("Unknown command"),
    }
}

fn teleport(services: &Services, player: &Player, dest: DVec3) {
    player.lock().coord = dest;
    services
        .spatial
        .insert_or_update(EntityRef::Player(player.id()), dest);
}

fn territory(services: &Services, player: &Player, rest: &str) {
    let (sub, args) = rest.split_once(' ').unwrap_or((rest, ""));
    match sub {
        "show" => {
            let territory = player.lock().territory.clone();
            if territory.is_empty() {
                player.info("You own no chunks");
            } else {
                for coord in territory {
                    player.info(format!("Owned chunk {coord}"));
                }
            }
        }
        "claim" => {
            let direction = if args.is_empty() {
                None
            } else {
                match args.parse::<Direction>() {
                    Ok(dir) => Some(dir),
                    Err(()) => {
                        player.fail("Unknown direction");
                        return;
                    }
                }
            };
            match services.territory.claim(player, direction) {
                Ok(coord) => player.info(format!("Claimed chunk {coord}")),
                Err(e) => player.fail(e.to_string()),
            }
        }
        "grant" => {
            let Ok(raw) = args.trim().parse::<u32>() else {
                player.fail("Usage: /territory grant <id>");
                return;
            };
            match services.territory.grant(player, PlayerId::from_raw(raw)) {
                Ok((coord, old)) => {
                    player.info(format!("Chunk {coord} (was {old}) granted to {raw}"));
                }
                Err(e) => player.fail(e.to_string()),
            }
        }
        "revert" => match services.territory.revert(player) {
            Ok(fresh) => player.info(format!("Chunk {} reverted", fresh.coord())),
            Err(e) => player.fail(e.to_string()),
        },
        _ => player.fail("Usage: /territory show|claim [direction]|grant <id>|revert"),
    }
}

fn sethome(services: &Services, player: &Player) {
    let pos = player.lock().coord;
    let coord = ChunkCoord::from_world(pos);
    // Home may only be set on the player's own territory; ownership is read
    // from the chunk record, not the cache.
    let owner = match services.cache.find(coord) {
        Ok(cached) => cached.lock().owner(),
        Err(e) => {
            player.fail(e.to_string());
            return;
        }
    };
    if owner != player.id() {
        player.fail("You do not own this chunk");
        return;
    }
    player.lock().home = pos;
    save_player_best_effort(services.players.as_ref(), player);
    player.info("Home set");
}

fn friend(services: &Services, player: &Player, rest: &str) {
    let (sub, name) = rest.split_once(' ').unwrap_or((rest, ""));
    let name = name.trim();
    if name.is_empty() {
        player.fail("Usage: /friend add|remove <name>");
        return;
    }
    match sub {
        "add" => {
            let mut state = player.lock();
            if state.friends.iter().any(|f| f.eq_ignore_ascii_case(name)) {
                drop(state);
                player.fail(format!("{name} is already your friend"));
                return;
            }
            state.friends.push(name.to_string());
            drop(state);
            save_player_best_effort(services.players.as_ref(), player);
            player.info(format!("{name} added as friend"));
        }
        "remove" => {
            let mut state = player.lock();
            let before = state.friends.len();
            state.friends.retain(|f| !f.eq_ignore_ascii_case(name));
            let removed = state.friends.len() < before;
            drop(state);
            if removed {
                save_player_best_effort(services.players.as_ref(), player);
                player.info(format!("{name} removed"));
            } else {
                player.fail(format!("{name} is not your friend"));
            }
        }
        _ => player.fail("Usage: /friend add|remove <name>"),
    }
}

fn tell(services: &Services, player: &Player, rest: &str) {
    let Some((name, msg)) = rest.split_once(' ') else {
        player.fail("Usage: /tell <name> <msg>");
        return;
    };
    match services.registry.find_by_name(name) {
        Some(target) if target.is_in() => {
            target.info(format!("{} tells you: {}", player.name(), msg.trim()));
        }
        _ => player.fail(format!("No player named {name}")),
    }
}

fn say(services: &Services, player: &Player, msg: &str) {
    let msg = msg.trim();
    if msg.is_empty() {
        player.fail("Usage: /say <msg>");
        return;
    }
    let pos = player.lock().coord;
    let nearby = services.spatial.query_radius(
        pos,
        services.config.say_radius,
        Some(EntityRef::Player(player.id())),
    );
    let mut delivered = false;
    for (entity, _) in nearby {
        let EntityRef::Player(id) = entity else { continue };
        if let Some(target) = services.registry.find_by_id(id) {
            if target.is_in() {
                target.info(format!("{} says: {msg}", player.name()));
                delivered = true;
            }
        }
    }
    if !delivered {
        player.fail("No one is near");
    }
}

fn list_players(services: &Services, player: &Player) {
    let names: Vec<String> = services
        .registry
        .snapshot()
        .iter()
        .filter(|p| p.is_in())
        .map(|p| p.name().to_string())
        .collect();
    player.info(format!("{} players online", names.len()));
    for name in names {
        player.info(name);
    }
}

fn activator(services: &Services, player: &Player, rest: &str) {
    const USAGE: &str = "Usage: /activator show|clear <cx> <cy> <cz> <x> <y> <z>|add <cx> <cy> <cz> <x> <y> <z> <msg>";
    let mut words = rest.split_whitespace();
    let Some(sub) = words.next() else {
        player.fail(USAGE);
        return;
    };
    let coords: Vec<&str> = words.by_ref().take(6).collect();
    if coords.len() != 6 {
        player.fail(USAGE);
        return;
    }
    let (Ok(cx), Ok(cy), Ok(cz)) = (
        coords[0].parse::<i32>(),
        coords[1].parse::<i32>(),
        coords[2].parse::<i32>(),
    ) else {
        player.fail(USAGE);
        return;
    };
    let (Ok(x), Ok(y), Ok(z)) = (
        coords[3].parse::<u8>(),
        coords[4].parse::<u8>(),
        coords[5].parse::<u8>(),
    ) else {
        player.fail(USAGE);
        return;
    };
    let coord = ChunkCoord::new(cx, cy, cz);
    let pos = LocalPos::new(x, y, z);
    if !pos.in_bounds() {
        player.fail("Position is outside the chunk");
        return;
    }

    match sub {
        "show" => match services.territory.triggers_at(coord, pos) {
            Ok(Some(messages)) => {
                for message in messages {
                    player.info(format!("Activator: {message}"));
                }
            }
            Ok(None) => player.info("No activator there"),
            Err(e) => player.fail(e.to_string()),
        },
        "add" => {
            let message: String = words.collect::<Vec<_>>().join(" ");
            if message.is_empty() {
                player.fail(USAGE);
                return;
            }
            match services.territory.add_trigger(coord, pos, message) {
                Ok(()) => player.info("Activator added"),
                Err(e) => player.fail(e.to_string()),
            }
        }
        "clear" => match services.territory.clear_trigger(coord, pos) {
            Ok(()) => player.info("Activator cleared"),
            Err(e) => player.fail(e.to_string()),
        },
        _ => player.fail(USAGE),
    }
}

fn revive(services: &Services, player: &Player) {
    let revive_pos = {
        let mut state = player.lock();
        if !state.dead {
            drop(state);
            player.fail("You are not dead");
            return;
        }
        state.dead = false;
        state.revive
    };
    teleport(services, player, revive_pos);
    player.info("You have been revived");
}

fn set_level(services: &Services, player: &Player, rest: &str) {
    if player.lock().admin_level < ADMIN_LEVEL_OPS {
        player.fail("Not permitted");
        return;
    }
    let Ok(level) = rest.trim().parse::<u32>() else {
        player.fail("Usage: /level <n>");
        return;
    };
    player.lock().level = level;
    save_player_best_effort(services.players.as_ref(), player);
    player.info(format!("Level set to {level}"));
}

fn status(services: &Services, player: &Player) {
    if player.lock().admin_level == 0 {
        player.fail("Not permitted");
        return;
    }
    player.info(format!(
        "Uptime {}s, {} sessions ({} in world), {} resident chunks, {} monsters",
        services.started.elapsed().as_secs(),
        services.registry.count(),
        services.registry.count_in(),
        services.cache.resident_count(),
        services.monsters.count(),
    ));
}

fn shutdown(services: &Services, player: &Player) {
    if player.lock().admin_level < ADMIN_LEVEL_OPS {
        player.fail("Not permitted");
        return;
    }
    info!("Shutdown requested by {}", player.name());
    player.info("Shutting down");
    services.request_shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use veld_common::SchemaVersion;
    use veld_gameplay::player::{MemoryPlayerStore, PlayerRecord, PlayerStore};
    use veld_gameplay::ConnState;
    use veld_world::{ChunkStore, MemoryChunkStore};

    fn services() -> Services {
        Services::new(
            ServerConfig::default(),
            Arc::new(MemoryChunkStore::new()) as Arc<dyn ChunkStore>,
            Arc::new(MemoryPlayerStore::new()) as Arc<dyn PlayerStore>,
        )
    }

    fn session(
        services: &Services,
        id: u32,
        name: &str,
        admin_level: u8,
    ) -> (Arc<Player>, mpsc::UnboundedReceiver<String>) {
        let record = PlayerRecord {
            version: SchemaVersion::PLAYER_RECORD,
            id: PlayerId::from_raw(id),
            name: name.to_string(),
            password: String::new(),
            admin_level,
            level: 100,
            coord: [0.0; 3],
            home: [0.0; 3],
            revive: [0.0; 3],
            territory: Vec::new(),
            max_chunks: 5,
            friends: Vec::new(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let player = Arc::new(Player::from_record(&record, tx));
        player.set_conn_state(ConnState::In);
        services.registry.register(Arc::clone(&player)).expect("register");
        services
            .spatial
            .insert_or_update(EntityRef::Player(player.id()), DVec3::ZERO);
        (player, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            out.push(line);
        }
        out
    }

    #[test]
    fn test_unknown_command_fails() {
        let services = services();
        let (player, mut rx) = session(&services, 1, "ada", 0);
        dispatch(&services, &player, "/frobnicate now");
        assert_eq!(drain(&mut rx), vec!["#FAIL Unknown command"]);
        // Empty lines are ignored outright.
        dispatch(&services, &player, "   ");
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_territory_claim_and_show() {
        let services = services();
        let (player, mut rx) = session(&services, 1, "ada", 0);

        dispatch(&services, &player, "/territory claim");
        assert_eq!(drain(&mut rx), vec!["!Claimed chunk (0,0,0)"]);

        dispatch(&services, &player, "/territory claim east");
        assert_eq!(drain(&mut rx), vec!["!Claimed chunk (1,0,0)"]);

        dispatch(&services, &player, "/territory show");
        let lines = drain(&mut rx);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("(0,0,0)"));

        dispatch(&services, &player, "/territory claim sideways");
        assert_eq!(drain(&mut rx), vec!["#FAIL Unknown direction"]);
    }

    #[test]
    fn test_claim_denials_reach_the_player() {
        let services = services();
        let (ada, mut ada_rx) = session(&services, 1, "ada", 0);
        let (bea, mut bea_rx) = session(&services, 2, "bea", 0);

        dispatch(&services, &ada, "/territory claim");
        drain(&mut ada_rx);
        dispatch(&services, &bea, "/territory claim");
        let lines = drain(&mut bea_rx);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("#FAIL Chunk is already owned"));
    }

    #[test]
    fn test_say_radius_and_no_one_near() {
        let services = services();
        let (ada, mut ada_rx) = session(&services, 1, "ada", 0);
        let (bea, mut bea_rx) = session(&services, 2, "bea", 0);

        // Bea is far away at first.
        services
            .spatial
            .insert_or_update(EntityRef::Player(bea.id()), DVec3::new(1000.0, 0.0, 0.0));
        dispatch(&services, &ada, "/say anyone?");
        assert_eq!(drain(&mut ada_rx), vec!["#FAIL No one is near"]);

        services
            .spatial
            .insert_or_update(EntityRef::Player(bea.id()), DVec3::new(10.0, 0.0, 0.0));
        dispatch(&services, &ada, "/say hello");
        assert!(drain(&mut ada_rx).is_empty());
        assert_eq!(drain(&mut bea_rx), vec!["!ada says: hello"]);
    }

    #[test]
    fn test_tell_delivers_or_fails() {
        let services = services();
        let (ada, mut ada_rx) = session(&services, 1, "ada", 0);
        let (_bea, mut bea_rx) = session(&services, 2, "bea", 0);

        dispatch(&services, &ada, "/tell bea psst");
        assert_eq!(drain(&mut bea_rx), vec!["!ada tells you: psst"]);

        dispatch(&services, &ada, "/tell nobody hi");
        assert_eq!(drain(&mut ada_rx), vec!["#FAIL No player named nobody"]);
    }

    #[test]
    fn test_sethome_requires_owned_chunk() {
        let services = services();
        let (player, mut rx) = session(&services, 1, "ada", 0);

        dispatch(&services, &player, "/sethome");
        assert_eq!(drain(&mut rx), vec!["#FAIL You do not own this chunk"]);

        dispatch(&services, &player, "/territory claim");
        drain(&mut rx);
        dispatch(&services, &player, "/sethome");
        assert_eq!(drain(&mut rx), vec!["!Home set"]);
    }

    #[test]
    fn test_home_teleports_and_updates_spatial() {
        let services = services();
        let (player, mut rx) = session(&services, 1, "ada", 0);
        {
            let mut state = player.lock();
            state.home = DVec3::new(100.0, 200.0, 0.0);
            state.coord = DVec3::new(5.0, 5.0, 0.0);
        }
        dispatch(&services, &player, "/home");
        assert_eq!(drain(&mut rx), vec!["!You are home"]);
        assert_eq!(player.lock().coord, DVec3::new(100.0, 200.0, 0.0));
        assert_eq!(
            services.spatial.position_of(EntityRef::Player(player.id())),
            Some(DVec3::new(100.0, 200.0, 0.0))
        );
    }

    #[test]
    fn test_friend_add_remove() {
        let services = services();
        let (player, mut rx) = session(&services, 1, "ada", 0);

        dispatch(&services, &player, "/friend add Bea");
        assert_eq!(drain(&mut rx), vec!["!Bea added as friend"]);
        dispatch(&services, &player, "/friend add bea");
        assert_eq!(drain(&mut rx), vec!["#FAIL bea is already your friend"]);
        dispatch(&services, &player, "/friend remove bea");
        assert_eq!(drain(&mut rx), vec!["!bea removed"]);
        dispatch(&services, &player, "/friend remove bea");
        assert_eq!(drain(&mut rx), vec!["#FAIL bea is not your friend"]);
    }

    #[test]
    fn test_activator_lifecycle() {
        let services = services();
        let (player, mut rx) = session(&services, 1, "ada", 0);

        dispatch(&services, &player, "/activator add 0 0 0 1 2 3 step lightly");
        assert_eq!(drain(&mut rx), vec!["!Activator added"]);

        dispatch(&services, &player, "/activator show 0 0 0 1 2 3");
        assert_eq!(drain(&mut rx), vec!["!Activator: step lightly"]);

        dispatch(&services, &player, "/activator clear 0 0 0 1 2 3");
        assert_eq!(drain(&mut rx), vec!["!Activator cleared"]);

        dispatch(&services, &player, "/activator show 0 0 0 1 2 3");
        assert_eq!(drain(&mut rx), vec!["!No activator there"]);

        dispatch(&services, &player, "/activator add 0 0 0 99 0 0 boom");
        assert_eq!(drain(&mut rx), vec!["#FAIL Position is outside the chunk"]);
    }

    #[test]
    fn test_revive_only_when_dead() {
        let services = services();
        let (player, mut rx) = session(&services, 1, "ada", 0);

        dispatch(&services, &player, "/revive");
        assert_eq!(drain(&mut rx), vec!["#FAIL You are not dead"]);

        {
            let mut state = player.lock();
            state.dead = true;
            state.revive = DVec3::new(7.0, 7.0, 0.0);
        }
        dispatch(&services, &player, "/revive");
        assert_eq!(drain(&mut rx), vec!["!You have been revived"]);
        assert!(!player.lock().dead);
        assert_eq!(player.lock().coord, DVec3::new(7.0, 7.0, 0.0));
    }

    #[test]
    fn test_level_and_shutdown_gates() {
        let services = services();
        let (peon, mut peon_rx) = session(&services, 1, "ada", 0);
        let (ops, mut ops_rx) = session(&services, 2, "ops", 8);

        dispatch(&services, &peon, "/level 50");
        assert_eq!(drain(&mut peon_rx), vec!["#FAIL Not permitted"]);
        dispatch(&services, &ops, "/level 50");
        assert_eq!(drain(&mut ops_rx), vec!["!Level set to 50"]);
        assert_eq!(ops.lock().level, 50);

        let mut shutdown = services.shutdown_receiver();
        dispatch(&services, &peon, "/shutdown");
        assert_eq!(drain(&mut peon_rx), vec!["#FAIL Not permitted"]);
        assert!(!*shutdown.borrow_and_update());
        dispatch(&services, &ops, "/shutdown");
        assert_eq!(drain(&mut ops_rx), vec!["!Shutting down"]);
        assert!(*shutdown.borrow_and_update());
    }

    #[test]
    fn test_status_visible_to_admins() {
        let services = services();
        let (peon, mut peon_rx) = session(&services, 1, "ada", 0);
        let (admin, mut admin_rx) = session(&services, 2, "ops", 1);

        dispatch(&services, &peon, "/status");
        assert_eq!(drain(&mut peon_rx), vec!["#FAIL Not permitted"]);

        dispatch(&services, &admin, "/status");
        let lines = drain(&mut admin_rx);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("2 sessions (2 in world)"));
    }

    #[test]
    fn test_players_lists_in_world_sessions() {
        let services = services();
        let (ada, mut rx) = session(&services, 1, "ada", 0);
        let _bea = session(&services, 2, "bea", 0);

        dispatch(&services, &ada, "/players");
        let lines = drain(&mut rx);
        assert_eq!(lines[0], "!2 players online");
        assert_eq!(lines.len(), 3);
    }
}
