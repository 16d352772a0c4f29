//! Per-connection lifecycle: handshake, command dispatch and teardown.
//!
//! Each accepted connection runs in its own task. The task authenticates
//! via the token store, registers with the session registry, is placed into
//! a room, then loops reading line-oriented commands or chat text. Outbound
//! traffic goes through an unbounded channel drained by a writer task, so
//! broadcasts from other connections never block on this peer's socket.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use crate::ai;
use crate::domain::Role;
use crate::protocol::{ClientCommand, SESSION_EXPIRED_LINE, TOKEN_PREFIX, parse_command};
use crate::rooms::{GENERAL_ROOM, Outbound, OutboundTx, RoomError, SessionId};

use super::moderation;
use super::state::AppState;

/// Handle one accepted connection until it closes.
///
/// I/O failures are logged here and never propagate beyond this task.
pub async fn handle_connection(state: Arc<AppState>, stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = run_session(state, stream, peer).await {
        tracing::warn!("Connection {} ended with I/O error: {}", peer, e);
    }
}

async fn run_session(
    state: Arc<AppState>,
    stream: TcpStream,
    peer: SocketAddr,
) -> io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half).lines();

    // Handshake: line 1 = username, line 2 = session token (may be empty).
    let Some(username) = reader.next_line().await? else {
        return Ok(());
    };
    let username = username.trim().to_string();
    if username.is_empty() {
        send_line(&mut write_half, "Username must not be empty.").await?;
        return Ok(());
    }
    // a comma would corrupt the CSV-persisted token and user records
    if username.contains(',') || username.chars().any(char::is_control) {
        send_line(&mut write_half, "Username must not contain ',' or control characters.").await?;
        return Ok(());
    }
    let Some(token_line) = reader.next_line().await? else {
        return Ok(());
    };
    let presented_secret = token_line.trim().to_string();

    let is_reconnection = !presented_secret.is_empty();
    let target_room = if is_reconnection {
        match state.tokens.validate(&username, &presented_secret).await {
            Ok(_) => state
                .rooms
                .last_room_for(&username)
                .await
                .unwrap_or_else(|| GENERAL_ROOM.to_string()),
            Err(e) => {
                tracing::info!("Rejected reconnection for '{}': {}", username, e);
                send_line(&mut write_half, SESSION_EXPIRED_LINE).await?;
                return Ok(());
            }
        }
    } else {
        GENERAL_ROOM.to_string()
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let session_id = match state.sessions.register(&username, tx.clone()).await {
        Ok(session_id) => session_id,
        Err(e) => {
            tracing::warn!("Rejecting connection {}: {}", peer, e);
            send_line(&mut write_half, &e.to_string()).await?;
            return Ok(());
        }
    };

    // First-time sessions get a token and a role-appropriate banner before
    // any room traffic; reconnections get neither.
    if !is_reconnection {
        if let Err(e) = greet(&state, &username, &mut write_half).await {
            state.sessions.unregister(session_id).await;
            return Err(e);
        }
    }
    tracing::info!(
        "Client '{}' connected from {} ({})",
        username,
        peer,
        if is_reconnection { "reconnection" } else { "new session" }
    );

    // Placement. The target room cannot have vanished (rooms are never
    // deleted), but fall back to general rather than leaving the session
    // roomless if it somehow did.
    let notice = if is_reconnection {
        format!("{username} has reconnected.")
    } else {
        format!("{username} has joined the room.")
    };
    if place_in_room(&state, session_id, &username, &tx, &target_room, &notice)
        .await
        .is_err()
    {
        let _ = place_in_room(&state, session_id, &username, &tx, GENERAL_ROOM, &notice).await;
    }

    // Writer task: drains the outbound channel onto the socket. The Close
    // sentinel queues behind any pending lines, so final notices are written
    // before the connection is shut down.
    let mut send_task = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            match out {
                Outbound::Line(line) => {
                    if write_half.write_all(line.as_bytes()).await.is_err() {
                        break;
                    }
                    if write_half.write_all(b"\n").await.is_err() {
                        break;
                    }
                }
                Outbound::Close => break,
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut recv_task = tokio::spawn(read_loop(
        state.clone(),
        session_id,
        username.clone(),
        tx.clone(),
        reader,
    ));
    // The registries hold the remaining senders; dropping this one lets the
    // writer observe channel closure once teardown removes those.
    drop(tx);

    tokio::select! {
        _ = &mut recv_task => {
            teardown(&state, session_id, &username).await;
            // let the writer flush whatever is still queued
            let _ = send_task.await;
        }
        _ = &mut send_task => {
            recv_task.abort();
            teardown(&state, session_id, &username).await;
        }
    }

    tracing::info!("Client '{}' disconnected", username);
    Ok(())
}

/// Issue a fresh token and send the welcome banner with the command list.
async fn greet(
    state: &Arc<AppState>,
    username: &str,
    write_half: &mut OwnedWriteHalf,
) -> io::Result<()> {
    let token = state
        .tokens
        .issue(username)
        .await
        .map_err(io::Error::other)?;
    send_line(write_half, &format!("{TOKEN_PREFIX}{}", token.secret)).await?;
    send_line(write_half, &format!("Welcome to the server, {username}!")).await?;
    for line in command_list(state.users.is_admin(username).await) {
        send_line(write_half, line).await?;
    }
    Ok(())
}

async fn send_line(write_half: &mut OwnedWriteHalf, line: &str) -> io::Result<()> {
    write_half.write_all(line.as_bytes()).await?;
    write_half.write_all(b"\n").await
}

/// Join `room`, confirm it to the session and notify the other members.
async fn place_in_room(
    state: &Arc<AppState>,
    session_id: SessionId,
    username: &str,
    tx: &OutboundTx,
    room: &str,
    notice: &str,
) -> Result<(), RoomError> {
    state
        .rooms
        .join(session_id, username, tx.clone(), room)
        .await?;
    push(tx, &format!("You joined the room: {room}"));
    state.rooms.broadcast(room, notice, Some(session_id)).await;
    Ok(())
}

/// Tell a room's remaining members that `username` moved on.
async fn notify_departure(state: &Arc<AppState>, room: &str, username: &str) {
    state
        .rooms
        .broadcast(room, &format!("{username} has left the room."), None)
        .await;
}

/// Remove the session from the connection registry and its room, keeping the
/// username's token and last-known-room entries for a future reconnection.
async fn teardown(state: &Arc<AppState>, session_id: SessionId, username: &str) {
    state.sessions.unregister(session_id).await;
    if let Some(room) = state.rooms.remove(session_id).await {
        state
            .rooms
            .broadcast(&room, &format!("{username} has left the room."), None)
            .await;
    }
}

/// Read lines until EOF, an I/O error or an explicit disconnect command.
async fn read_loop(
    state: Arc<AppState>,
    session_id: SessionId,
    username: String,
    tx: OutboundTx,
    mut reader: Lines<BufReader<OwnedReadHalf>>,
) {
    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Read error for '{}': {}", username, e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_command(line) {
            Some(command) => {
                if dispatch_command(&state, session_id, &username, &tx, command).await {
                    break;
                }
            }
            None => handle_chat(&state, session_id, &username, &tx, line).await,
        }
    }
}

/// Execute one parsed command.
///
/// # Returns
///
/// `true` when the session asked to disconnect.
async fn dispatch_command(
    state: &Arc<AppState>,
    session_id: SessionId,
    username: &str,
    tx: &OutboundTx,
    command: ClientCommand,
) -> bool {
    if command.is_admin_only() {
        if !state.users.is_admin(username).await {
            push(tx, moderation::PERMISSION_DENIED);
            return false;
        }
        let reply = match command {
            ClientCommand::Ban { target } => moderation::ban(state, &target).await,
            ClientCommand::Mute { target } => moderation::set_muted(state, &target, true).await,
            ClientCommand::Unmute { target } => moderation::set_muted(state, &target, false).await,
            ClientCommand::Promote { target } => {
                moderation::set_role(state, &target, Role::Admin).await
            }
            ClientCommand::Demote { target } => {
                moderation::set_role(state, &target, Role::User).await
            }
            ClientCommand::Announce { text } => moderation::announce(state, &text).await,
            ClientCommand::Kick { target } => moderation::kick(state, &target).await,
            ClientCommand::Stats => moderation::stats(state).await,
            _ => unreachable!("is_admin_only covers exactly the admin commands"),
        };
        push(tx, &reply);
        return false;
    }

    match command {
        ClientCommand::CreateRoom { name } => match state.rooms.create_room(&name).await {
            Ok(()) => push(tx, &format!("Room '{name}' created.")),
            Err(RoomError::RoomExists(_)) => push(tx, &format!("Room '{name}' already exists.")),
            Err(e) => push(tx, &e.to_string()),
        },
        ClientCommand::CreateAiRoom { name, prompt } => {
            match state.rooms.create_ai_room(&name, &prompt).await {
                Ok(()) => push(
                    tx,
                    &format!("AI chat room '{name}' created with prompt: {prompt}"),
                ),
                Err(RoomError::RoomExists(_)) => {
                    push(tx, &format!("Room '{name}' already exists."))
                }
                Err(e) => push(tx, &e.to_string()),
            }
        }
        ClientCommand::Join { name } => {
            let previous = state.rooms.current_room(session_id).await;
            if previous.as_deref() == Some(name.as_str()) {
                push(tx, &format!("You are already in '{name}'."));
                return false;
            }
            let notice = format!("{username} has joined the room.");
            match place_in_room(state, session_id, username, tx, &name, &notice).await {
                Ok(()) => {
                    if let Some(previous) = previous {
                        notify_departure(state, &previous, username).await;
                    }
                }
                Err(RoomError::RoomNotFound(_)) => {
                    push(tx, &format!("Room '{name}' does not exist."));
                }
                Err(e) => push(tx, &e.to_string()),
            }
        }
        ClientCommand::Leave => {
            let previous = state.rooms.current_room(session_id).await;
            if previous.as_deref() == Some(GENERAL_ROOM) {
                push(tx, &format!("You are already in '{GENERAL_ROOM}'."));
            } else {
                let notice = format!("{username} has joined the room.");
                if place_in_room(state, session_id, username, tx, GENERAL_ROOM, &notice)
                    .await
                    .is_ok()
                {
                    if let Some(previous) = previous {
                        notify_departure(state, &previous, username).await;
                    }
                }
            }
        }
        ClientCommand::Rooms => {
            let names = state.rooms.room_names().await;
            push(tx, &format!("Rooms: {}", names.join(", ")));
        }
        ClientCommand::Users => match state.rooms.current_room(session_id).await {
            Some(room) => match state.rooms.members_of(&room).await {
                Ok(members) => push(tx, &format!("Users in '{room}': {}", members.join(", "))),
                Err(e) => push(tx, &e.to_string()),
            },
            None => push(tx, "You are not in a room."),
        },
        ClientCommand::Help => {
            for line in command_list(state.users.is_admin(username).await) {
                push(tx, line);
            }
        }
        ClientCommand::Status => {
            let room = state
                .rooms
                .current_room(session_id)
                .await
                .unwrap_or_else(|| "(none)".to_string());
            let role = state.users.role_of(username).await;
            push(tx, &format!("You are '{username}' ({role}) in room '{room}'."));
            if state.users.is_muted(username).await {
                push(tx, "You are currently muted.");
            }
        }
        ClientCommand::Disconnect => {
            push(tx, "Goodbye!");
            return true;
        }
        ClientCommand::Unknown { word } => {
            push(
                tx,
                &format!("Unknown command '/{word}'. Type /help for a list of commands."),
            );
        }
        // admin commands were handled above
        _ => {}
    }
    false
}

/// Broadcast a chat line to the sender's room; AI rooms additionally feed
/// the coalescing pipeline.
async fn handle_chat(
    state: &Arc<AppState>,
    session_id: SessionId,
    username: &str,
    tx: &OutboundTx,
    text: &str,
) {
    if state.users.is_muted(username).await {
        push(tx, "You are muted and cannot send messages.");
        return;
    }
    let Some(room) = state.rooms.current_room(session_id).await else {
        push(tx, "You are not in a room.");
        return;
    };
    state
        .rooms
        .broadcast(&room, &format!("{username}: {text}"), Some(session_id))
        .await;
    if let Some(ai_room) = state.rooms.ai_room(&room).await {
        ai::submit(
            ai_room,
            state.rooms.clone(),
            state.generator.clone(),
            room,
            text.to_string(),
        )
        .await;
    }
}

fn push(tx: &OutboundTx, line: &str) {
    // a closed channel means the peer is already gone; teardown handles it
    let _ = tx.send(Outbound::Line(line.to_string()));
}

/// Welcome/help text, with the admin section only for admins.
fn command_list(is_admin: bool) -> Vec<&'static str> {
    let mut lines = vec![
        "Available commands:",
        "  /create <name>              create a room",
        "  /create ai:<name>:<prompt>  create an AI room",
        "  /join <name>                join a room",
        "  /leave                      return to general",
        "  /rooms                      list rooms",
        "  /users                      list users in your room",
        "  /status                     show your session info",
        "  /help                       show this list",
        "  /disconnect                 leave the server",
    ];
    if is_admin {
        lines.extend([
            "Admin commands:",
            "  /ban <user>      /mute <user>    /unmute <user>",
            "  /promote <user>  /demote <user>  /kick <user>",
            "  /announce <text> /stats",
        ]);
    }
    lines
}
