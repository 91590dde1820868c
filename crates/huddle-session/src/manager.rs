//! Registry of connected users.
//!
//! ```text
//!   open(conn, identity) ──► Session { connections += conn }
//!   track_join(user, room) ► Session { rooms += room }
//!   close(conn, user) ─────► last connection?  yes → Some(rooms to leave)
//!                                              no  → None
//! ```
//!
//! Not thread-safe on its own; the server keeps it behind a
//! `tokio::sync::Mutex`.

use std::collections::HashMap;

use huddle_protocol::{RoomId, UserId};

use crate::{ConnectionId, Identity, Session, SessionError};

#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: HashMap<UserId, Session>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection for `identity`, creating the session on the
    /// user's first connection. A later connection refreshes the display
    /// name.
    pub fn open(&mut self, conn: ConnectionId, identity: Identity) -> &Session {
        let Identity {
            user_id,
            display_name,
        } = identity;
        let session = self
            .sessions
            .entry(user_id)
            .or_insert_with(|| Session::new(user_id, display_name.clone()));
        session.display_name = display_name;
        session.connections.insert(conn);
        tracing::info!(
            %user_id,
            %conn,
            connections = session.connections.len(),
            "session opened"
        );
        session
    }

    /// Drops a connection. Returns the rooms to leave when this was the
    /// user's last connection (the session is then removed), `None`
    /// otherwise.
    ///
    /// # Errors
    /// `SessionError::NoSession` if the user has no session.
    pub fn close(
        &mut self,
        conn: ConnectionId,
        user_id: UserId,
    ) -> Result<Option<Vec<RoomId>>, SessionError> {
        let session = self
            .sessions
            .get_mut(&user_id)
            .ok_or(SessionError::NoSession(user_id))?;
        session.connections.remove(&conn);
        if !session.connections.is_empty() {
            tracing::debug!(%user_id, %conn, "connection closed, session kept");
            return Ok(None);
        }

        let rooms: Vec<RoomId> = session.rooms().collect();
        self.sessions.remove(&user_id);
        tracing::info!(%user_id, rooms = rooms.len(), "session closed");
        Ok(Some(rooms))
    }

    /// Records that `user_id` entered `room_id`. Ignored for users without
    /// a session.
    pub fn track_join(&mut self, user_id: UserId, room_id: RoomId) {
        if let Some(session) = self.sessions.get_mut(&user_id) {
            session.rooms.insert(room_id);
        }
    }

    /// Records that `user_id` is no longer in `room_id`.
    pub fn track_leave(&mut self, user_id: UserId, room_id: RoomId) {
        if let Some(session) = self.sessions.get_mut(&user_id) {
            session.rooms.remove(&room_id);
        }
    }

    pub fn get(&self, user_id: &UserId) -> Option<&Session> {
        self.sessions.get(user_id)
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.sessions.contains_key(user_id)
    }

    /// Number of users with at least one open connection.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
