//! Captains and team assignments.
//!
//! Captains are appointed during leader election. When team formation
//! begins the per-team slot limit is fixed at
//! `ceil(active members / team count)` and every captain is placed on
//! their own team; the mini-engines fill the remaining slots.

use std::collections::BTreeMap;

use huddle_protocol::{TeamId, UserId};
use serde::{Deserialize, Serialize};

use crate::{Conflict, Missing, RoomError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamBoard {
    team_count: u8,
    slot_limit: usize,
    captains: BTreeMap<TeamId, UserId>,
    assignments: BTreeMap<UserId, TeamId>,
}

impl TeamBoard {
    pub fn new(team_count: u8) -> Self {
        Self {
            team_count,
            slot_limit: 0,
            captains: BTreeMap::new(),
            assignments: BTreeMap::new(),
        }
    }

    /// Team ids `1..=team_count`.
    pub fn teams(&self) -> impl Iterator<Item = TeamId> {
        (1..=self.team_count).map(TeamId)
    }

    pub fn check_team(&self, team: TeamId) -> Result<(), RoomError> {
        if (1..=self.team_count).contains(&team.0) {
            Ok(())
        } else {
            Err(Missing::Team(team).into())
        }
    }

    // -----------------------------------------------------------------------
    // Captains
    // -----------------------------------------------------------------------

    /// Makes `user` captain of `team`, replacing any previous captain.
    ///
    /// # Errors
    /// `Conflict::AlreadyCaptain` if `user` captains a different team.
    pub fn appoint(&mut self, team: TeamId, user: UserId) -> Result<Option<UserId>, RoomError> {
        self.check_team(team)?;
        if let Some(current) = self.team_captained_by(user) {
            if current != team {
                return Err(Conflict::AlreadyCaptain.into());
            }
        }
        Ok(self.captains.insert(team, user))
    }

    pub fn captain_of(&self, team: TeamId) -> Option<UserId> {
        self.captains.get(&team).copied()
    }

    pub fn team_captained_by(&self, user: UserId) -> Option<TeamId> {
        self.captains
            .iter()
            .find(|(_, captain)| **captain == user)
            .map(|(team, _)| *team)
    }

    pub fn is_captain(&self, user: UserId) -> bool {
        self.team_captained_by(user).is_some()
    }

    /// Removes `user` from captaincy, returning the team they led.
    pub fn dismiss(&mut self, user: UserId) -> Option<TeamId> {
        let team = self.team_captained_by(user)?;
        self.captains.remove(&team);
        Some(team)
    }

    pub fn has_full_captaincy(&self) -> bool {
        self.teams().all(|team| self.captains.contains_key(&team))
    }

    pub fn captains(&self) -> impl Iterator<Item = (TeamId, UserId)> + '_ {
        self.captains.iter().map(|(t, u)| (*t, *u))
    }

    // -----------------------------------------------------------------------
    // Assignments
    // -----------------------------------------------------------------------

    /// Fixes the slot limit for `active` members and seats the captains.
    pub fn begin_formation(&mut self, active: usize) {
        self.assignments.clear();
        self.slot_limit = active.div_ceil(usize::from(self.team_count)).max(1);
        for (team, captain) in self.captains.clone() {
            self.assignments.insert(captain, team);
        }
    }

    /// Drops captains and assignments alike.
    pub fn disband(&mut self) {
        self.captains.clear();
        self.reset();
    }

    /// Drops every assignment. Captains stay.
    pub fn reset(&mut self) {
        self.assignments.clear();
        self.slot_limit = 0;
    }

    pub fn slot_limit(&self) -> usize {
        self.slot_limit
    }

    /// Places `user` on `team`.
    ///
    /// # Errors
    /// `NotFound` for an unknown team, `AlreadyAssigned` if the user has a
    /// team, `TeamFull` when the slot limit is reached.
    pub fn assign(&mut self, user: UserId, team: TeamId) -> Result<(), RoomError> {
        self.check_team(team)?;
        if self.assignments.contains_key(&user) {
            return Err(Conflict::AlreadyAssigned.into());
        }
        if !self.is_open(team) {
            return Err(Conflict::TeamFull(team).into());
        }
        self.assignments.insert(user, team);
        Ok(())
    }

    pub fn unassign(&mut self, user: UserId) -> Option<TeamId> {
        self.assignments.remove(&user)
    }

    pub fn team_of(&self, user: UserId) -> Option<TeamId> {
        self.assignments.get(&user).copied()
    }

    pub fn is_assigned(&self, user: UserId) -> bool {
        self.assignments.contains_key(&user)
    }

    pub fn size_of(&self, team: TeamId) -> usize {
        self.assignments.values().filter(|t| **t == team).count()
    }

    pub fn free_slots(&self, team: TeamId) -> usize {
        self.slot_limit.saturating_sub(self.size_of(team))
    }

    pub fn is_open(&self, team: TeamId) -> bool {
        self.free_slots(team) > 0
    }

    /// Teams with a free slot, lowest id first.
    pub fn open_teams(&self) -> Vec<TeamId> {
        self.teams().filter(|t| self.is_open(*t)).collect()
    }

    /// The open team with the fewest members, lowest id on ties.
    pub fn smallest_open_team(&self) -> Option<TeamId> {
        self.open_teams().into_iter().min_by_key(|t| (self.size_of(*t), *t))
    }

    pub fn everyone_assigned<'a>(&self, mut users: impl Iterator<Item = &'a UserId>) -> bool {
        users.all(|u| self.assignments.contains_key(u))
    }
}
