//! Membership ledger: who is in the room and in what capacity.
//!
//! Members are kept in join order. A user appears at most once, so a
//! spectator who wants to play has to leave and join again.

use huddle_protocol::{Capacity, Timestamp, UserId};
use serde::{Deserialize, Serialize};

use crate::{Conflict, Missing, RoomError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: UserId,
    pub display_name: String,
    pub capacity: Capacity,
    pub joined_at: Timestamp,
}

impl Member {
    pub fn is_active(&self) -> bool {
        self.capacity.is_active()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    members: Vec<Member>,
}

impl Ledger {
    /// Adds `member` at the end of the join order.
    ///
    /// # Errors
    /// `Conflict::AlreadyMember` if the user is already in the room in any
    /// capacity.
    pub fn admit(&mut self, member: Member) -> Result<(), RoomError> {
        if self.contains(member.user_id) {
            return Err(Conflict::AlreadyMember.into());
        }
        self.members.push(member);
        Ok(())
    }

    pub fn remove(&mut self, user: UserId) -> Result<Member, RoomError> {
        let index = self
            .members
            .iter()
            .position(|m| m.user_id == user)
            .ok_or(Missing::Member(user))?;
        Ok(self.members.remove(index))
    }

    pub fn get(&self, user: UserId) -> Option<&Member> {
        self.members.iter().find(|m| m.user_id == user)
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.get(user).is_some()
    }

    /// The member, provided they are a leader or participant.
    ///
    /// # Errors
    /// `NotFound` for strangers, `Forbidden(Spectator)` for spectators.
    pub fn active_member(&self, user: UserId) -> Result<&Member, RoomError> {
        let member = self.get(user).ok_or(Missing::Member(user))?;
        if !member.is_active() {
            return Err(crate::Denied::Spectator.into());
        }
        Ok(member)
    }

    pub(crate) fn set_capacity(&mut self, user: UserId, capacity: Capacity) {
        if let Some(member) = self.members.iter_mut().find(|m| m.user_id == user) {
            member.capacity = capacity;
        }
    }

    pub fn leader(&self) -> Option<UserId> {
        self.members
            .iter()
            .find(|m| m.capacity == Capacity::Leader)
            .map(|m| m.user_id)
    }

    pub fn is_leader(&self, user: UserId) -> bool {
        self.leader() == Some(user)
    }

    /// All members in join order.
    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.members.iter()
    }

    /// Leaders and participants in join order.
    pub fn active(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(|m| m.is_active())
    }

    pub fn active_ids(&self) -> Vec<UserId> {
        self.active().map(|m| m.user_id).collect()
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.members.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u64, capacity: Capacity, at: u64) -> Member {
        Member {
            user_id: UserId(id),
            display_name: format!("p{id}"),
            capacity,
            joined_at: Timestamp(at),
        }
    }

    #[test]
    fn test_admit_rejects_duplicates_across_capacities() {
        let mut ledger = Ledger::default();
        ledger.admit(member(1, Capacity::Spectator, 1)).unwrap();
        let err = ledger.admit(member(1, Capacity::Participant, 2)).unwrap_err();
        assert!(matches!(err, RoomError::Conflict(Conflict::AlreadyMember)));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_active_excludes_spectators() {
        let mut ledger = Ledger::default();
        ledger.admit(member(1, Capacity::Leader, 1)).unwrap();
        ledger.admit(member(2, Capacity::Spectator, 2)).unwrap();
        ledger.admit(member(3, Capacity::Participant, 3)).unwrap();
        assert_eq!(ledger.active_ids(), vec![UserId(1), UserId(3)]);
        assert_eq!(ledger.active_count(), 2);
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.leader(), Some(UserId(1)));
    }

    #[test]
    fn test_active_member_distinguishes_strangers_and_spectators() {
        let mut ledger = Ledger::default();
        ledger.admit(member(2, Capacity::Spectator, 2)).unwrap();
        assert!(matches!(
            ledger.active_member(UserId(9)),
            Err(RoomError::NotFound(Missing::Member(_)))
        ));
        assert!(matches!(
            ledger.active_member(UserId(2)),
            Err(RoomError::Forbidden(crate::Denied::Spectator))
        ));
    }

    #[test]
    fn test_remove_unknown_member() {
        let mut ledger = Ledger::default();
        assert!(matches!(
            ledger.remove(UserId(4)),
            Err(RoomError::NotFound(Missing::Member(u))) if u == UserId(4)
        ));
    }
}
