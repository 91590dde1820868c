//! Per-user session record.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use huddle_protocol::{RoomId, UserId};

/// Identifies one transport connection. A user may hold several at once
/// (two browser tabs, a phone and a desktop).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C-{}", self.0)
    }
}

/// Everything the server remembers about a connected user.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: UserId,
    pub display_name: String,
    pub(crate) connections: HashSet<ConnectionId>,
    /// Rooms joined (as leader, participant or spectator) through any of
    /// this user's connections.
    pub(crate) rooms: BTreeSet<RoomId>,
}

impl Session {
    pub(crate) fn new(user_id: UserId, display_name: String) -> Self {
        Self {
            user_id,
            display_name,
            connections: HashSet::new(),
            rooms: BTreeSet::new(),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Joined rooms in id order.
    pub fn rooms(&self) -> impl Iterator<Item = RoomId> + '_ {
        self.rooms.iter().copied()
    }
}
