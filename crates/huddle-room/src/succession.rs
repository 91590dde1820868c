//! Leadership succession.

use huddle_protocol::UserId;

use crate::Ledger;

/// The member who takes over when `departing` (the leader) leaves: the
/// earliest joiner among the remaining leaders and participants, lowest
/// user id on equal join times. Spectators never inherit a room.
pub fn successor(ledger: &Ledger, departing: UserId) -> Option<UserId> {
    ledger
        .active()
        .filter(|m| m.user_id != departing)
        .min_by_key(|m| (m.joined_at, m.user_id))
        .map(|m| m.user_id)
}
