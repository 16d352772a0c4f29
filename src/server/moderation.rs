//! Admin-only moderation commands.
//!
//! Each operation returns the reply shown to the issuing admin and, where it
//! affects another user, pushes a notification to that user's connection.
//! The permission gate itself lives in the connection handler; everything
//! here assumes the issuer is an admin.

use std::sync::Arc;

use crate::auth::AuthError;
use crate::domain::Role;
use crate::protocol::{BANNED_LINE, ROLE_UPDATE_PREFIX};
use crate::rooms::{GENERAL_ROOM, Outbound};

use super::state::AppState;

/// Reply sent for admin commands issued by a non-admin.
pub const PERMISSION_DENIED: &str = "Permission denied: admin privileges required.";

/// Forcibly close the target's connection after a final notice.
///
/// The ban is transient: nothing stops the user from reconnecting with a
/// fresh login, matching the behavior this server was modeled on.
pub async fn ban(state: &Arc<AppState>, target: &str) -> String {
    match state.sessions.find_by_username(target).await {
        Some((_, tx)) => {
            // Close 番兵はチャネル上で BANNED: の後ろに並ぶので、通知は必ず先に書き出される
            let _ = tx.send(Outbound::Line(BANNED_LINE.to_string()));
            let _ = tx.send(Outbound::Close);
            tracing::info!("User '{}' banned", target);
            format!("User '{target}' has been banned.")
        }
        None => format!("User '{target}' is not connected."),
    }
}

pub async fn set_muted(state: &Arc<AppState>, target: &str, muted: bool) -> String {
    match state.users.set_muted(target, muted).await {
        Ok(()) => {
            let (verb, notice) = if muted {
                ("muted", "You have been muted by an admin.")
            } else {
                ("unmuted", "You have been unmuted by an admin.")
            };
            state.sessions.notify(target, notice).await;
            format!("User '{target}' has been {verb}.")
        }
        Err(AuthError::UserNotFound(_)) => format!("User '{target}' not found."),
        Err(e) => e.to_string(),
    }
}

pub async fn set_role(state: &Arc<AppState>, target: &str, role: Role) -> String {
    match state.users.set_role(target, role).await {
        Ok(()) => {
            state
                .sessions
                .notify(target, &format!("{ROLE_UPDATE_PREFIX}{role}"))
                .await;
            tracing::info!("User '{}' role changed to {}", target, role);
            format!("User '{target}' is now {role}.")
        }
        Err(AuthError::UserNotFound(_)) => format!("User '{target}' not found."),
        Err(AuthError::AlreadyInRole { .. }) => format!("User '{target}' is already {role}."),
        Err(e) => e.to_string(),
    }
}

/// Broadcast a line to every member of every room.
pub async fn announce(state: &Arc<AppState>, text: &str) -> String {
    state
        .rooms
        .broadcast_all(&format!("[Announcement] {text}"))
        .await;
    "Announcement sent.".to_string()
}

/// Move the target back to `general`. Kicking someone who already sits in
/// `general` is rejected.
pub async fn kick(state: &Arc<AppState>, target: &str) -> String {
    let Some((session_id, tx)) = state.sessions.find_by_username(target).await else {
        return format!("User '{target}' is not connected.");
    };
    let Some(room) = state.rooms.current_room(session_id).await else {
        return format!("User '{target}' is not in any room.");
    };
    if room == GENERAL_ROOM {
        return format!("Cannot kick '{target}' out of '{GENERAL_ROOM}'.");
    }
    if let Err(e) = state
        .rooms
        .join(session_id, target, tx.clone(), GENERAL_ROOM)
        .await
    {
        // general は常に存在するのでここには来ない
        return e.to_string();
    }
    let _ = tx.send(Outbound::Line(format!(
        "You have been kicked back to '{GENERAL_ROOM}'."
    )));
    let _ = tx.send(Outbound::Line(format!(
        "You joined the room: {GENERAL_ROOM}"
    )));
    state
        .rooms
        .broadcast(&room, &format!("{target} was kicked from the room."), None)
        .await;
    format!("User '{target}' kicked to '{GENERAL_ROOM}'.")
}

/// Connected-user count, per-room membership counts and the muted list.
pub async fn stats(state: &Arc<AppState>) -> String {
    let connected = state.sessions.count().await;
    let counts = state.rooms.member_counts().await;
    let muted = state.users.muted_users().await;

    let mut lines = vec![format!("Connected users: {connected}")];
    lines.push("Rooms:".to_string());
    for (room, members) in counts {
        lines.push(format!("  {room}: {members} member(s)"));
    }
    if muted.is_empty() {
        lines.push("Muted users: (none)".to_string());
    } else {
        lines.push(format!("Muted users: {}", muted.join(", ")));
    }
    lines.join("\n")
}
