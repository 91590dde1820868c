//! Free-join: members pick their own team from the ones the leader offers.
//! Every team is offered until the leader narrows the set.

use huddle_protocol::{FormationView, TeamId, UserId};
use serde::{Deserialize, Serialize};

use crate::{RoomError, TeamBoard};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreeJoin {
    offered: Vec<TeamId>,
}

impl FreeJoin {
    /// Offers every team on the board.
    pub fn start(board: &TeamBoard) -> Self {
        Self {
            offered: board.teams().collect(),
        }
    }

    /// Replaces the offered set. The offered teams must have seats for all
    /// `unplaced` members still without a team. Members already seated on
    /// a team that is no longer offered keep their seat.
    pub fn offer(&mut self, board: &TeamBoard, teams: &[TeamId], unplaced: usize) -> Result<(), RoomError> {
        let mut offered = teams.to_vec();
        offered.sort_unstable();
        offered.dedup();
        if offered.is_empty() {
            return Err(RoomError::validation("offer at least one team"));
        }
        for team in &offered {
            board.check_team(*team)?;
        }
        let seats: usize = offered.iter().map(|t| board.free_slots(*t)).sum();
        if seats < unplaced {
            return Err(RoomError::validation(format!(
                "offered teams seat {seats}, {unplaced} members still need a team"
            )));
        }
        self.offered = offered;
        Ok(())
    }

    pub fn offered(&self) -> &[TeamId] {
        &self.offered
    }

    /// First pick sticks: a member who already has a team is rejected.
    pub fn choose(&self, board: &mut TeamBoard, user: UserId, team: TeamId) -> Result<(), RoomError> {
        if !self.offered.contains(&team) {
            return Err(RoomError::validation(format!("{team} is not offered")));
        }
        board.assign(user, team)
    }

    pub fn view(&self, board: &TeamBoard) -> FormationView {
        FormationView::Free {
            offered: self.offered.clone(),
            slot_limit: board.slot_limit(),
        }
    }
}
