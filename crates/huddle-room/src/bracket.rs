//! Single-elimination bracket.
//!
//! Participants are seeded in the order given. Each round pairs the i-th
//! entrant with the (n-1-i)-th; with an odd count the middle entrant gets
//! a bye. The next round's entrants are the survivors in seed order.
//!
//! ```text
//! seeds [A, B, C, D, E]
//! round 1   A-E   B-D   C (bye)
//! round 2   A-C   B (bye)          (A, B won)
//! round 3   A-B
//! ```
//!
//! The bracket completes when one participant is left standing, which
//! always takes `n - 1` decided matches.

use std::collections::BTreeSet;

use huddle_protocol::{BracketView, MatchId, MatchStatus, MatchView, UserId};
use serde::{Deserialize, Serialize};

use crate::{Missing, RoomError};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BracketMatch {
    id: MatchId,
    round: u32,
    slot: u32,
    player1: UserId,
    player2: UserId,
    winner: Option<UserId>,
    status: MatchStatus,
}

impl BracketMatch {
    fn involves(&self, user: UserId) -> bool {
        self.player1 == user || self.player2 == user
    }

    fn opponent_of(&self, user: UserId) -> UserId {
        if self.player1 == user { self.player2 } else { self.player1 }
    }

    fn is_pending(&self) -> bool {
        self.status == MatchStatus::Pending
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bracket {
    seeds: Vec<UserId>,
    total_rounds: u32,
    current_round: u32,
    matches: Vec<BracketMatch>,
    byes: Vec<(u32, UserId)>,
    eliminated: BTreeSet<UserId>,
    champion: Option<UserId>,
    completed: bool,
    next_match: u32,
}

impl Bracket {
    /// Seeds `participants` in order and draws round 1.
    ///
    /// # Errors
    /// `Validation` for fewer than two participants or a duplicate.
    pub fn create(participants: Vec<UserId>) -> Result<Self, RoomError> {
        if participants.len() < 2 {
            return Err(RoomError::validation("a bracket needs at least two participants"));
        }
        let unique: BTreeSet<UserId> = participants.iter().copied().collect();
        if unique.len() != participants.len() {
            return Err(RoomError::validation("bracket participants must be distinct"));
        }
        let n = u32::try_from(participants.len())
            .map_err(|_| RoomError::validation("too many bracket participants"))?;

        let mut bracket = Self {
            total_rounds: u32::BITS - (n - 1).leading_zeros(),
            seeds: participants,
            current_round: 0,
            matches: Vec::new(),
            byes: Vec::new(),
            eliminated: BTreeSet::new(),
            champion: None,
            completed: false,
            next_match: 1,
        };
        bracket.open_next_round();
        Ok(bracket)
    }

    /// Records `winner` for `match_id`. Returns `true` once the bracket is
    /// complete.
    ///
    /// # Errors
    /// `NotFound` for an unknown match. `InvalidReport` if the match is
    /// decided, the reporter is neither one of its players nor the room
    /// leader, or `winner` did not play in it.
    pub fn report(
        &mut self,
        match_id: MatchId,
        winner: UserId,
        reporter: UserId,
        reporter_is_leader: bool,
    ) -> Result<bool, RoomError> {
        let m = self
            .matches
            .iter_mut()
            .find(|m| m.id == match_id)
            .ok_or(Missing::Match(match_id))?;
        if !m.is_pending() {
            return Err(RoomError::InvalidReport(format!("{match_id} is already decided")));
        }
        if !m.involves(reporter) && !reporter_is_leader {
            return Err(RoomError::InvalidReport(format!(
                "{reporter} did not play in {match_id}"
            )));
        }
        if !m.involves(winner) {
            return Err(RoomError::InvalidReport(format!(
                "{winner} did not play in {match_id}"
            )));
        }
        let loser = m.opponent_of(winner);
        m.winner = Some(winner);
        m.status = MatchStatus::Decided;
        self.eliminated.insert(loser);
        self.progress();
        Ok(self.completed)
    }

    /// Removes a departing participant. A pending match becomes a walkover
    /// for the opponent. Returns `true` if the bracket changed.
    pub fn forfeit(&mut self, user: UserId) -> bool {
        if self.completed || !self.seeds.contains(&user) || self.eliminated.contains(&user) {
            return false;
        }
        let round = self.current_round;
        if let Some(m) = self
            .matches
            .iter_mut()
            .find(|m| m.round == round && m.is_pending() && m.involves(user))
        {
            m.winner = Some(m.opponent_of(user));
            m.status = MatchStatus::Walkover;
        }
        self.eliminated.insert(user);
        self.progress();
        true
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn champion(&self) -> Option<UserId> {
        self.champion
    }

    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    pub fn total_rounds(&self) -> u32 {
        self.total_rounds
    }

    #[cfg(test)]
    pub(crate) fn match_between(&self, player1: UserId, player2: UserId) -> Option<MatchId> {
        self.matches
            .iter()
            .find(|m| m.involves(player1) && m.involves(player2))
            .map(|m| m.id)
    }

    /// Pending matches of the current round.
    pub fn pending(&self) -> Vec<MatchId> {
        self.matches.iter().filter(|m| m.is_pending()).map(|m| m.id).collect()
    }

    pub fn view(&self) -> BracketView {
        BracketView {
            seeds: self.seeds.clone(),
            total_rounds: self.total_rounds,
            current_round: self.current_round,
            matches: self
                .matches
                .iter()
                .map(|m| MatchView {
                    match_id: m.id,
                    round: m.round,
                    slot: m.slot,
                    player1: m.player1,
                    player2: m.player2,
                    winner: m.winner,
                    status: m.status,
                })
                .collect(),
            byes: self.byes.clone(),
            eliminated: self
                .seeds
                .iter()
                .copied()
                .filter(|u| self.eliminated.contains(u))
                .collect(),
            champion: self.champion,
            completed: self.completed,
        }
    }

    fn survivors(&self) -> Vec<UserId> {
        self.seeds
            .iter()
            .copied()
            .filter(|u| !self.eliminated.contains(u))
            .collect()
    }

    /// Completes the bracket or draws the next round once the current one
    /// has no pending matches.
    fn progress(&mut self) {
        let survivors = self.survivors();
        if survivors.len() <= 1 {
            self.finish(survivors.first().copied());
            return;
        }
        let round = self.current_round;
        if self.matches.iter().any(|m| m.round == round && m.is_pending()) {
            return;
        }
        self.open_next_round();
    }

    fn open_next_round(&mut self) {
        let entrants = self.survivors();
        if entrants.len() <= 1 {
            self.finish(entrants.first().copied());
            return;
        }
        self.current_round += 1;
        let round = self.current_round;
        let n = entrants.len();
        for i in 0..n / 2 {
            self.matches.push(BracketMatch {
                id: MatchId(self.next_match),
                round,
                slot: i as u32 + 1,
                player1: entrants[i],
                player2: entrants[n - 1 - i],
                winner: None,
                status: MatchStatus::Pending,
            });
            self.next_match += 1;
        }
        if n % 2 == 1 {
            self.byes.push((round, entrants[n / 2]));
        }
        tracing::debug!(round, matches = n / 2, bye = n % 2 == 1, "bracket round drawn");
    }

    fn finish(&mut self, champion: Option<UserId>) {
        self.champion = champion;
        self.completed = true;
    }
}
