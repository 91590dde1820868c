//! Role draft: each active member claims one lane role.
//!
//! With [`RoleScope::Room`] a role can be held once in the whole room;
//! with [`RoleScope::Team`] once per team.

use std::collections::BTreeMap;

use huddle_protocol::{Role, RoleScope, UserId};
use serde::{Deserialize, Serialize};

use crate::{Conflict, RoomError, TeamBoard};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleDraft {
    scope: RoleScope,
    claims: BTreeMap<UserId, Role>,
}

impl RoleDraft {
    pub fn new(scope: RoleScope) -> Self {
        Self {
            scope,
            claims: BTreeMap::new(),
        }
    }

    /// Records `user`'s claim on `role`.
    ///
    /// # Errors
    /// `AlreadyClaimed` if `user` holds a role, `RoleTaken` if someone in
    /// the same scope holds `role`.
    pub fn claim(&mut self, board: &TeamBoard, user: UserId, role: Role) -> Result<(), RoomError> {
        if self.claims.contains_key(&user) {
            return Err(Conflict::AlreadyClaimed.into());
        }
        let team = board.team_of(user);
        let taken = self.claims.iter().any(|(holder, held)| {
            *held == role
                && match self.scope {
                    RoleScope::Room => true,
                    RoleScope::Team => board.team_of(*holder) == team,
                }
        });
        if taken {
            return Err(Conflict::RoleTaken(role).into());
        }
        self.claims.insert(user, role);
        Ok(())
    }

    pub fn release(&mut self, user: UserId) -> Option<Role> {
        self.claims.remove(&user)
    }

    pub fn role_of(&self, user: UserId) -> Option<Role> {
        self.claims.get(&user).copied()
    }

    pub fn everyone_claimed<'a>(&self, mut users: impl Iterator<Item = &'a UserId>) -> bool {
        users.all(|u| self.claims.contains_key(u))
    }

    pub fn clear(&mut self) {
        self.claims.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::TeamId;

    fn board() -> TeamBoard {
        let mut board = TeamBoard::new(2);
        board.begin_formation(4);
        board.assign(UserId(1), TeamId(1)).unwrap();
        board.assign(UserId(2), TeamId(1)).unwrap();
        board.assign(UserId(3), TeamId(2)).unwrap();
        board.assign(UserId(4), TeamId(2)).unwrap();
        board
    }

    #[test]
    fn test_room_scope_roles_are_unique() {
        let board = board();
        let mut draft = RoleDraft::new(RoleScope::Room);
        draft.claim(&board, UserId(1), Role::Mid).unwrap();
        assert!(matches!(
            draft.claim(&board, UserId(3), Role::Mid),
            Err(RoomError::Conflict(Conflict::RoleTaken(Role::Mid)))
        ));
    }

    #[test]
    fn test_team_scope_allows_same_role_on_other_team() {
        let board = board();
        let mut draft = RoleDraft::new(RoleScope::Team);
        draft.claim(&board, UserId(1), Role::Mid).unwrap();
        draft.claim(&board, UserId(3), Role::Mid).unwrap();
        assert!(matches!(
            draft.claim(&board, UserId(2), Role::Mid),
            Err(RoomError::Conflict(Conflict::RoleTaken(Role::Mid)))
        ));
    }

    #[test]
    fn test_one_role_per_member() {
        let board = board();
        let mut draft = RoleDraft::new(RoleScope::Room);
        draft.claim(&board, UserId(1), Role::Top).unwrap();
        assert!(matches!(
            draft.claim(&board, UserId(1), Role::Jungle),
            Err(RoomError::Conflict(Conflict::AlreadyClaimed))
        ));
        assert_eq!(draft.role_of(UserId(1)), Some(Role::Top));
    }

    #[test]
    fn test_release_frees_role() {
        let board = board();
        let mut draft = RoleDraft::new(RoleScope::Room);
        draft.claim(&board, UserId(1), Role::Support).unwrap();
        assert_eq!(draft.release(UserId(1)), Some(Role::Support));
        draft.claim(&board, UserId(2), Role::Support).unwrap();
    }

    #[test]
    fn test_everyone_claimed() {
        let board = board();
        let mut draft = RoleDraft::new(RoleScope::Team);
        let users = [UserId(1), UserId(3)];
        draft.claim(&board, UserId(1), Role::Adc).unwrap();
        assert!(!draft.everyone_claimed(users.iter()));
        draft.claim(&board, UserId(3), Role::Adc).unwrap();
        assert!(draft.everyone_claimed(users.iter()));
    }
}
