//! Server state: the connection/session registry and the shared
//! application state handed to every connection task.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::ai::TextGenerator;
use crate::auth::{TokenStore, UserDirectory};
use crate::rooms::{Outbound, OutboundTx, RoomRegistry, SessionId};

/// Errors from session registration
#[derive(Debug, Error)]
pub enum SessionError {
    /// A connection is already authenticated under this username
    #[error("user '{0}' is already connected")]
    AlreadyConnected(String),
}

/// One authenticated connection.
pub struct SessionEntry {
    pub username: String,
    pub tx: OutboundTx,
}

/// Lock-guarded registry of open, authenticated connections.
///
/// At most one connection per username: a second login attempt is rejected
/// at registration time, before the newcomer is placed into any room.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection to a username.
    pub async fn register(
        &self,
        username: &str,
        tx: OutboundTx,
    ) -> Result<SessionId, SessionError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.values().any(|s| s.username == username) {
            return Err(SessionError::AlreadyConnected(username.to_string()));
        }
        let session_id = Uuid::new_v4();
        sessions.insert(
            session_id,
            SessionEntry {
                username: username.to_string(),
                tx,
            },
        );
        Ok(session_id)
    }

    /// Drop a connection's binding. Token and last-room state live elsewhere
    /// and survive this.
    pub async fn unregister(&self, session_id: SessionId) -> Option<SessionEntry> {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(&session_id)
    }

    /// Find the connection currently bound to `username`.
    pub async fn find_by_username(&self, username: &str) -> Option<(SessionId, OutboundTx)> {
        let sessions = self.sessions.lock().await;
        sessions
            .iter()
            .find(|(_, s)| s.username == username)
            .map(|(id, s)| (*id, s.tx.clone()))
    }

    /// Push one line to the connection bound to `username`, if any.
    pub async fn notify(&self, username: &str, line: &str) {
        if let Some((_, tx)) = self.find_by_username(username).await {
            let _ = tx.send(Outbound::Line(line.to_string()));
        }
    }

    pub async fn count(&self) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.len()
    }
}

/// Shared application state.
///
/// Each registry guards its own state with its own lock; no method holds two
/// of them at once, so connection tasks can use them in any order without
/// deadlock.
pub struct AppState {
    pub users: UserDirectory,
    pub tokens: TokenStore,
    pub rooms: Arc<RoomRegistry>,
    pub sessions: SessionRegistry,
    pub generator: Arc<dyn TextGenerator>,
}

impl AppState {
    pub fn new(
        users: UserDirectory,
        tokens: TokenStore,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            users,
            tokens,
            rooms: Arc::new(RoomRegistry::new()),
            sessions: SessionRegistry::new(),
            generator,
        }
    }
}
