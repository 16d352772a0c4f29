//! Room registry and broadcast fan-out.
//!
//! The registry is the single owner of room membership: it tracks which
//! session sits in which room (exactly one room per active session) and the
//! last room each username was seen in, so a reconnecting user can be placed
//! back where they left off.
//!
//! Broadcasting only holds the registry lock long enough to snapshot the
//! member senders; the actual socket writes happen in each recipient's own
//! writer task, so a slow or dead peer never stalls the others.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::ai::AiRoom;

/// Identifier of one open connection.
pub type SessionId = Uuid;

/// Message pushed to a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    /// One newline-terminated text line for the peer
    Line(String),
    /// Flush whatever is queued, then close the connection
    Close,
}

/// Sender half of a connection's outbound channel.
pub type OutboundTx = mpsc::UnboundedSender<Outbound>;

/// The room every session starts in. It always exists and is never removed.
pub const GENERAL_ROOM: &str = "general";

/// Errors from room operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("room '{0}' already exists")]
    RoomExists(String),

    #[error("room '{0}' does not exist")]
    RoomNotFound(String),
}

struct Member {
    username: String,
    tx: OutboundTx,
}

struct Room {
    members: HashMap<SessionId, Member>,
    ai: Option<Arc<AiRoom>>,
}

impl Room {
    fn plain() -> Self {
        Self {
            members: HashMap::new(),
            ai: None,
        }
    }

    fn with_ai(system_prompt: String) -> Self {
        Self {
            members: HashMap::new(),
            ai: Some(Arc::new(AiRoom::new(system_prompt))),
        }
    }
}

struct Inner {
    rooms: HashMap<String, Room>,
    /// session → room name; the invariant is exactly one entry per active
    /// session after placement
    placement: HashMap<SessionId, String>,
    /// username → room the user was last placed in; survives disconnects
    last_rooms: HashMap<String, String>,
}

/// Lock-guarded registry of rooms and their members.
pub struct RoomRegistry {
    inner: Mutex<Inner>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    /// Create a registry seeded with the `general` room.
    pub fn new() -> Self {
        let mut rooms = HashMap::new();
        rooms.insert(GENERAL_ROOM.to_string(), Room::plain());
        Self {
            inner: Mutex::new(Inner {
                rooms,
                placement: HashMap::new(),
                last_rooms: HashMap::new(),
            }),
        }
    }

    /// Create an empty room.
    pub async fn create_room(&self, name: &str) -> Result<(), RoomError> {
        let mut inner = self.inner.lock().await;
        if inner.rooms.contains_key(name) {
            return Err(RoomError::RoomExists(name.to_string()));
        }
        inner.rooms.insert(name.to_string(), Room::plain());
        tracing::info!("Room '{}' created", name);
        Ok(())
    }

    /// Create an AI-enabled room with the given system prompt.
    pub async fn create_ai_room(&self, name: &str, system_prompt: &str) -> Result<(), RoomError> {
        let mut inner = self.inner.lock().await;
        if inner.rooms.contains_key(name) {
            return Err(RoomError::RoomExists(name.to_string()));
        }
        inner
            .rooms
            .insert(name.to_string(), Room::with_ai(system_prompt.to_string()));
        tracing::info!("AI room '{}' created", name);
        Ok(())
    }

    /// Place a session into `room`, removing it from its current room.
    ///
    /// Strict: fails with [`RoomError::RoomNotFound`] before touching the
    /// current membership, so a failed join never leaves a session roomless.
    /// Also records `room` as the username's last-known room.
    pub async fn join(
        &self,
        session_id: SessionId,
        username: &str,
        tx: OutboundTx,
        room: &str,
    ) -> Result<(), RoomError> {
        let mut inner = self.inner.lock().await;
        if !inner.rooms.contains_key(room) {
            return Err(RoomError::RoomNotFound(room.to_string()));
        }
        if let Some(current) = inner.placement.remove(&session_id) {
            if let Some(r) = inner.rooms.get_mut(&current) {
                r.members.remove(&session_id);
            }
        }
        inner.placement.insert(session_id, room.to_string());
        inner
            .last_rooms
            .insert(username.to_string(), room.to_string());
        if let Some(r) = inner.rooms.get_mut(room) {
            r.members.insert(
                session_id,
                Member {
                    username: username.to_string(),
                    tx,
                },
            );
        }
        Ok(())
    }

    /// Remove a session from whatever room it is in.
    ///
    /// The username's last-known-room entry is deliberately kept so a later
    /// reconnection lands back in the same room.
    ///
    /// # Returns
    ///
    /// The room the session was a member of, if any.
    pub async fn remove(&self, session_id: SessionId) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let room = inner.placement.remove(&session_id)?;
        if let Some(r) = inner.rooms.get_mut(&room) {
            r.members.remove(&session_id);
        }
        Some(room)
    }

    /// Room the session currently sits in.
    pub async fn current_room(&self, session_id: SessionId) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.placement.get(&session_id).cloned()
    }

    /// Room the username was last placed in, if it ever joined one.
    pub async fn last_room_for(&self, username: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.last_rooms.get(username).cloned()
    }

    /// Sorted room names.
    pub async fn room_names(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut names: Vec<String> = inner.rooms.keys().cloned().collect();
        names.sort();
        names
    }

    /// Sorted (room, member count) pairs for `/stats`.
    pub async fn member_counts(&self) -> Vec<(String, usize)> {
        let inner = self.inner.lock().await;
        let mut counts: Vec<(String, usize)> = inner
            .rooms
            .iter()
            .map(|(name, room)| (name.clone(), room.members.len()))
            .collect();
        counts.sort();
        counts
    }

    /// Sorted usernames of a room's members.
    pub async fn members_of(&self, room: &str) -> Result<Vec<String>, RoomError> {
        let inner = self.inner.lock().await;
        let r = inner
            .rooms
            .get(room)
            .ok_or_else(|| RoomError::RoomNotFound(room.to_string()))?;
        let mut names: Vec<String> = r.members.values().map(|m| m.username.clone()).collect();
        names.sort();
        Ok(names)
    }

    /// The AI pipeline attached to `room`, if it is an AI room.
    pub async fn ai_room(&self, room: &str) -> Option<Arc<AiRoom>> {
        let inner = self.inner.lock().await;
        inner.rooms.get(room).and_then(|r| r.ai.clone())
    }

    /// Fan a message out to every member of `room` except `exclude`.
    ///
    /// The lock is released before any send; pushes go to per-connection
    /// unbounded channels, and a closed channel (peer already gone) is logged
    /// and skipped without affecting the other recipients.
    pub async fn broadcast(&self, room: &str, message: &str, exclude: Option<SessionId>) {
        let targets: Vec<(String, OutboundTx)> = {
            let inner = self.inner.lock().await;
            match inner.rooms.get(room) {
                Some(r) => r
                    .members
                    .iter()
                    .filter(|(id, _)| Some(**id) != exclude)
                    .map(|(_, m)| (m.username.clone(), m.tx.clone()))
                    .collect(),
                None => {
                    tracing::warn!("Broadcast to unknown room '{}' dropped", room);
                    return;
                }
            }
        };
        for (username, tx) in targets {
            if tx.send(Outbound::Line(message.to_string())).is_err() {
                tracing::warn!("Failed to deliver to '{}' in '{}', skipping", username, room);
            }
        }
    }

    /// Fan a message out to every member of every room.
    pub async fn broadcast_all(&self, message: &str) {
        let targets: Vec<(String, OutboundTx)> = {
            let inner = self.inner.lock().await;
            inner
                .rooms
                .values()
                .flat_map(|r| r.members.values())
                .map(|m| (m.username.clone(), m.tx.clone()))
                .collect()
        };
        for (username, tx) in targets {
            if tx.send(Outbound::Line(message.to_string())).is_err() {
                tracing::warn!("Failed to deliver announcement to '{}', skipping", username);
            }
        }
    }
}
