//! Network listener and per-connection workers.
//!
//! Each connection gets a reader task driving authentication and command
//! dispatch, and a paired writer task that drains the session's outbox. All
//! network writes happen on the writer task with no locks held; everything
//! upstream only enqueues.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use veld_gameplay::player::{create_account, save_player_best_effort, Outbox};
use veld_gameplay::spatial::EntityRef;
use veld_gameplay::{ConnState, Player};

use crate::command;
use crate::services::Services;

type LineReader = tokio::io::Lines<BufReader<OwnedReadHalf>>;

/// Accepts connections until the shutdown signal flips.
pub async fn serve(services: Arc<Services>, listener: TcpListener) {
    let mut shutdown = services.shutdown_receiver();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, addr)) => {
                        debug!("Connection from {addr}");
                        tokio::spawn(handle_connection(Arc::clone(&services), socket));
                    }
                    Err(e) => warn!("Accept failed: {e}"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("Listener stopped");
}

async fn handle_connection(services: Arc<Services>, socket: TcpStream) {
    let (read_half, mut write_half) = socket.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if write_half.write_all(b"\n").await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut lines = BufReader::new(read_half).lines();
    if let Some(player) = authenticate(&services, &tx, &mut lines).await {
        session_loop(&services, &player, &mut lines).await;
        disconnect(&services, &player);
    }

    // Closing our sender ends the writer task once the queue drains.
    drop(tx);
    let _ = writer.await;
}

/// Drives the Login → Password → In state machine against the player store.
///
/// Returns the registered session, or `None` if the client went away or
/// failed a step (a `#FAIL` line has been enqueued by then).
async fn authenticate(
    services: &Services,
    outbox: &Outbox,
    lines: &mut LineReader,
) -> Option<Arc<Player>> {
    let send = |line: String| {
        let _ = outbox.send(line);
    };
    send(format!("!{}", services.config.welcome));
    send("!Enter your name".to_string());

    let name = read_line(lines).await?;
    if name.is_empty() {
        send("#FAIL A name is required".to_string());
        return None;
    }

    let is_test = services.config.allow_test_users && is_test_user(&name);
    let record = match services.players.load(&name) {
        Ok(record) => record,
        Err(e) => {
            warn!("Account lookup for {name} failed: {e}");
            send("#FAIL Login unavailable".to_string());
            return None;
        }
    };
    let record = match record {
        Some(record) => record,
        None if is_test => {
            match create_account(
                services.players.as_ref(),
                &name,
                "",
                0,
                services.config.default_max_chunks,
            ) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Test account creation for {name} failed: {e}");
                    send("#FAIL Login unavailable".to_string());
                    return None;
                }
            }
        }
        None => {
            send(format!("#FAIL No player named {name}"));
            return None;
        }
    };

    let player = Arc::new(Player::from_record(&record, outbox.clone()));
    if !is_test {
        player.set_conn_state(ConnState::Password);
        send("!Enter your password".to_string());
        let password = read_line(lines).await?;
        if !player.password_matches(&password) {
            send("#FAIL Invalid password".to_string());
            return None;
        }
    }

    player.set_conn_state(ConnState::In);
    if let Err(e) = services.registry.register(Arc::clone(&player)) {
        send(format!("#FAIL {e}"));
        return None;
    }
    let pos = player.lock().coord;
    services
        .spatial
        .insert_or_update(EntityRef::Player(player.id()), pos);

    player.info(format!("Welcome, {}", player.name()));
    info!("Player {} logged in", player.name());
    Some(player)
}

async fn session_loop(services: &Services, player: &Arc<Player>, lines: &mut LineReader) {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => command::dispatch(services, player, &line),
            Ok(None) => break,
            Err(e) => {
                debug!("Read error for {}: {e}", player.name());
                break;
            }
        }
    }
}

fn disconnect(services: &Services, player: &Arc<Player>) {
    services.registry.unregister(player.id());
    services.spatial.remove(EntityRef::Player(player.id()));
    save_player_best_effort(services.players.as_ref(), player);
    info!("Player {} disconnected", player.name());
}

async fn read_line(lines: &mut LineReader) -> Option<String> {
    match lines.next_line().await {
        Ok(Some(line)) => Some(line.trim().to_string()),
        _ => None,
    }
}

/// `testN` names get passwordless logins when the operator allows them.
fn is_test_user(name: &str) -> bool {
    name.strip_prefix("test")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}
