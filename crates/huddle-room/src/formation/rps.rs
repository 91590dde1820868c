//! Rock-paper-scissors: unresolved members play rounds until everyone is
//! on a team.
//!
//! A round with exactly two distinct hands is binary: winners fill the
//! lowest-numbered open team and losers the next one, in join order, up to
//! each team's free slots. Whoever does not fit plays on. A round where
//! everyone threw the same hand, or all three hands appear, is replayed.
//! After `round_cap` rounds the rest are shuffled into the open teams.
//!
//! Hands stay secret until a round resolves. Absentees get a random hand
//! when the round deadline passes.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use huddle_protocol::{FormationView, Hand, RoundView, Timestamp, UserId};
use rand::RngCore;
use rand::seq::{IndexedRandom, SliceRandom};
use serde::{Deserialize, Serialize};

use crate::{Conflict, Denied, RoomError, TeamBoard};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpsEngine {
    round: u32,
    round_cap: u32,
    window: Duration,
    deadline: Option<Timestamp>,
    /// Members still without a team, in join order.
    unresolved: Vec<UserId>,
    choices: BTreeMap<UserId, Hand>,
    last_round: Option<RoundView>,
}

impl RpsEngine {
    /// Starts round 1 for everyone on `contenders` who has no team yet.
    pub fn start(
        board: &mut TeamBoard,
        contenders: &[UserId],
        round_cap: u32,
        window: Duration,
        now: Timestamp,
        rng: &mut dyn RngCore,
    ) -> Self {
        let mut engine = Self {
            round: 1,
            round_cap: round_cap.max(1),
            window,
            deadline: None,
            unresolved: contenders
                .iter()
                .copied()
                .filter(|u| !board.is_assigned(*u))
                .collect(),
            choices: BTreeMap::new(),
            last_round: None,
        };
        engine.open_round(board, now, rng);
        engine
    }

    /// Records `user`'s hand. Resolves the round once every unresolved
    /// member has played.
    pub fn submit(
        &mut self,
        board: &mut TeamBoard,
        user: UserId,
        hand: Hand,
        now: Timestamp,
        rng: &mut dyn RngCore,
    ) -> Result<u32, RoomError> {
        if !self.unresolved.contains(&user) {
            return Err(if board.is_assigned(user) {
                Conflict::AlreadyResolved.into()
            } else {
                Denied::NotParticipant.into()
            });
        }
        if self.choices.contains_key(&user) {
            return Err(Conflict::ChoiceAlreadySubmitted.into());
        }
        let round = self.round;
        self.choices.insert(user, hand);
        if self.everyone_played() {
            self.resolve(board, now, rng);
        }
        Ok(round)
    }

    /// Resolves an overdue round, filling in random hands for absentees.
    /// Returns `false` if nothing was due.
    pub fn expire(&mut self, board: &mut TeamBoard, now: Timestamp, rng: &mut dyn RngCore) -> bool {
        if !self.is_due(now) {
            return false;
        }
        for user in &self.unresolved {
            if !self.choices.contains_key(user) {
                let hand = *Hand::ALL.choose(rng).unwrap_or(&Hand::Rock);
                self.choices.insert(*user, hand);
            }
        }
        self.resolve(board, now, rng);
        true
    }

    /// Drops a departing member. The round resolves if everyone left has
    /// already played.
    pub fn withdraw(&mut self, board: &mut TeamBoard, user: UserId, now: Timestamp, rng: &mut dyn RngCore) {
        let before = self.unresolved.len();
        self.unresolved.retain(|u| *u != user);
        self.choices.remove(&user);
        if self.unresolved.len() == before {
            return;
        }
        if self.unresolved.is_empty() {
            self.deadline = None;
        } else if self.everyone_played() {
            self.resolve(board, now, rng);
        } else {
            self.settle_trivial(board);
        }
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        !self.unresolved.is_empty() && self.deadline.is_some_and(|d| now >= d)
    }

    pub fn deadline(&self) -> Option<Timestamp> {
        self.deadline
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn is_settled(&self) -> bool {
        self.unresolved.is_empty()
    }

    pub fn unresolved(&self) -> &[UserId] {
        &self.unresolved
    }

    pub fn view(&self, board: &TeamBoard) -> FormationView {
        FormationView::RockPaperScissors {
            slot_limit: board.slot_limit(),
            round: self.round,
            round_cap: self.round_cap,
            deadline: self.deadline,
            unresolved: self.unresolved.clone(),
            submitted: self.choices.keys().copied().collect(),
            last_round: self.last_round.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    fn everyone_played(&self) -> bool {
        !self.unresolved.is_empty() && self.unresolved.iter().all(|u| self.choices.contains_key(u))
    }

    fn resolve(&mut self, board: &mut TeamBoard, now: Timestamp, rng: &mut dyn RngCore) {
        let hands: Vec<(UserId, Hand)> = self
            .unresolved
            .iter()
            .filter_map(|u| self.choices.get(u).map(|h| (*u, *h)))
            .collect();
        let distinct: BTreeSet<Hand> = hands.iter().map(|(_, h)| *h).collect();

        let decisive = distinct.len() == 2;
        if decisive {
            let mut pair = distinct.iter().copied();
            let (a, b) = (pair.next(), pair.next());
            if let (Some(a), Some(b)) = (a, b) {
                let winning = if a.beats(b) { a } else { b };
                self.place_binary(board, &hands, winning);
            }
        }

        tracing::debug!(
            round = self.round,
            decisive,
            unresolved = self.unresolved.len(),
            "rps round resolved"
        );
        self.last_round = Some(RoundView {
            round: self.round,
            hands,
            decisive,
        });
        self.choices.clear();

        if self.unresolved.is_empty() {
            self.deadline = None;
            return;
        }
        if self.round >= self.round_cap {
            self.random_fallback(board, rng);
            return;
        }
        self.round += 1;
        self.open_round(board, now, rng);
    }

    fn place_binary(&mut self, board: &mut TeamBoard, hands: &[(UserId, Hand)], winning: Hand) {
        let open = board.open_teams();
        let (Some(&first), Some(&second)) = (open.first(), open.get(1)) else {
            return;
        };
        let winners = hands.iter().filter(|(_, h)| *h == winning).map(|(u, _)| *u);
        let losers = hands.iter().filter(|(_, h)| *h != winning).map(|(u, _)| *u);

        let mut placed = Vec::new();
        for (group, team) in [(winners.collect::<Vec<_>>(), first), (losers.collect(), second)] {
            for user in group.into_iter().take(board.free_slots(team)) {
                if board.assign(user, team).is_ok() {
                    placed.push(user);
                }
            }
        }
        self.unresolved.retain(|u| !placed.contains(u));
    }

    /// Opens the next round, unless the outcome is already forced.
    fn open_round(&mut self, board: &mut TeamBoard, now: Timestamp, rng: &mut dyn RngCore) {
        self.settle_trivial(board);
        if self.unresolved.is_empty() {
            self.deadline = None;
        } else if self.round > self.round_cap {
            self.random_fallback(board, rng);
        } else {
            self.deadline = Some(now.saturating_add(self.window));
        }
    }

    /// One member left, or only one team with room: no contest needed.
    fn settle_trivial(&mut self, board: &mut TeamBoard) {
        let open = board.open_teams();
        if self.unresolved.len() == 1 || open.len() == 1 {
            self.place_in_smallest(board);
        }
    }

    fn random_fallback(&mut self, board: &mut TeamBoard, rng: &mut dyn RngCore) {
        tracing::debug!(
            round = self.round,
            unresolved = self.unresolved.len(),
            "rps round cap reached, splitting at random"
        );
        self.unresolved.shuffle(rng);
        self.place_in_smallest(board);
    }

    fn place_in_smallest(&mut self, board: &mut TeamBoard) {
        let pending = std::mem::take(&mut self.unresolved);
        for user in pending {
            match board.smallest_open_team() {
                Some(team) if board.assign(user, team).is_ok() => {}
                _ => self.unresolved.push(user),
            }
        }
        self.choices.clear();
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::TeamId;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const WINDOW: Duration = Duration::from_secs(20);

    fn uid(id: u64) -> UserId {
        UserId(id)
    }

    /// Captains 1 and 2 seated; `extra` more members without a team.
    fn setup(extra: u64) -> (TeamBoard, Vec<UserId>) {
        seated(2, extra)
    }

    /// Users `1..=teams` captain their own team; `extra` more follow.
    fn seated(teams: u8, extra: u64) -> (TeamBoard, Vec<UserId>) {
        let mut board = TeamBoard::new(teams);
        for team in 1..=teams {
            board.appoint(TeamId(team), uid(u64::from(team))).unwrap();
        }
        let all: Vec<UserId> = (1..=u64::from(teams) + extra).map(uid).collect();
        board.begin_formation(all.len());
        (board, all)
    }

    #[test]
    fn test_binary_round_maps_winners_to_first_team() {
        let (mut board, all) = setup(2);
        let mut rng = StdRng::seed_from_u64(1);
        let mut rps = RpsEngine::start(&mut board, &all, 3, WINDOW, Timestamp(0), &mut rng);
        assert_eq!(rps.unresolved(), &[uid(3), uid(4)]);

        rps.submit(&mut board, uid(3), Hand::Scissors, Timestamp(1), &mut rng).unwrap();
        rps.submit(&mut board, uid(4), Hand::Rock, Timestamp(2), &mut rng).unwrap();

        assert!(rps.is_settled());
        assert_eq!(board.team_of(uid(4)), Some(TeamId(1)));
        assert_eq!(board.team_of(uid(3)), Some(TeamId(2)));
    }

    #[test]
    fn test_tie_replays_round() {
        let (mut board, all) = setup(2);
        let mut rng = StdRng::seed_from_u64(1);
        let mut rps = RpsEngine::start(&mut board, &all, 3, WINDOW, Timestamp(0), &mut rng);

        rps.submit(&mut board, uid(3), Hand::Paper, Timestamp(1), &mut rng).unwrap();
        rps.submit(&mut board, uid(4), Hand::Paper, Timestamp(1), &mut rng).unwrap();

        assert_eq!(rps.round(), 2);
        assert!(!rps.is_settled());
        assert_eq!(rps.deadline(), Some(Timestamp(1).saturating_add(WINDOW)));
    }

    #[test]
    fn test_three_way_split_replays_round() {
        let (mut board, all) = setup(4);
        let mut rng = StdRng::seed_from_u64(1);
        let mut rps = RpsEngine::start(&mut board, &all, 3, WINDOW, Timestamp(0), &mut rng);

        rps.submit(&mut board, uid(3), Hand::Rock, Timestamp(1), &mut rng).unwrap();
        rps.submit(&mut board, uid(4), Hand::Paper, Timestamp(1), &mut rng).unwrap();
        rps.submit(&mut board, uid(5), Hand::Scissors, Timestamp(1), &mut rng).unwrap();
        rps.submit(&mut board, uid(6), Hand::Scissors, Timestamp(1), &mut rng).unwrap();

        assert_eq!(rps.round(), 2);
        assert_eq!(rps.unresolved().len(), 4);
    }

    #[test]
    fn test_overflow_stays_unresolved() {
        // Slot limit 3: two free seats per team, three winners.
        let (mut board, all) = setup(4);
        let mut rng = StdRng::seed_from_u64(1);
        let mut rps = RpsEngine::start(&mut board, &all, 3, WINDOW, Timestamp(0), &mut rng);

        rps.submit(&mut board, uid(3), Hand::Rock, Timestamp(1), &mut rng).unwrap();
        rps.submit(&mut board, uid(4), Hand::Rock, Timestamp(1), &mut rng).unwrap();
        rps.submit(&mut board, uid(5), Hand::Rock, Timestamp(1), &mut rng).unwrap();
        rps.submit(&mut board, uid(6), Hand::Scissors, Timestamp(1), &mut rng).unwrap();

        assert_eq!(board.team_of(uid(3)), Some(TeamId(1)));
        assert_eq!(board.team_of(uid(4)), Some(TeamId(1)));
        assert_eq!(board.team_of(uid(6)), Some(TeamId(2)));
        // Only team 2 has room left, so the overflow winner is settled there.
        assert_eq!(board.team_of(uid(5)), Some(TeamId(2)));
        assert!(rps.is_settled());
    }

    #[test]
    fn test_round_cap_falls_back_to_random_split() {
        let (mut board, all) = setup(4);
        let mut rng = StdRng::seed_from_u64(99);
        let mut rps = RpsEngine::start(&mut board, &all, 2, WINDOW, Timestamp(0), &mut rng);

        for round in 0..2 {
            for id in 3..=6 {
                rps.submit(&mut board, uid(id), Hand::Rock, Timestamp(round), &mut rng)
                    .unwrap();
            }
        }

        assert!(rps.is_settled());
        assert!(board.everyone_assigned(all.iter()));
        assert_eq!(board.size_of(TeamId(1)), 3);
        assert_eq!(board.size_of(TeamId(2)), 3);
    }

    #[test]
    fn test_rounds_always_terminate_within_cap() {
        for seed in 0..50u64 {
            let (mut board, all) = setup(7);
            let mut rng = StdRng::seed_from_u64(seed);
            let mut rps = RpsEngine::start(&mut board, &all, 3, WINDOW, Timestamp(0), &mut rng);
            let mut now = Timestamp(0);
            while !rps.is_settled() {
                assert!(rps.round() <= 3);
                now = now.saturating_add(WINDOW);
                assert!(rps.expire(&mut board, now, &mut rng));
            }
            assert!(board.everyone_assigned(all.iter()));
            assert!(board.size_of(TeamId(1)) <= board.slot_limit());
            assert!(board.size_of(TeamId(2)) <= board.slot_limit());
        }
    }

    #[test]
    fn test_three_teams_fill_evenly_for_absentees() {
        for seed in 0..50u64 {
            let (mut board, all) = seated(3, 6);
            assert_eq!(board.slot_limit(), 3);
            let mut rng = StdRng::seed_from_u64(seed);
            let mut rps = RpsEngine::start(&mut board, &all, 3, WINDOW, Timestamp(0), &mut rng);
            let mut now = Timestamp(0);
            while !rps.is_settled() {
                assert!(rps.round() <= 3);
                now = now.saturating_add(WINDOW);
                assert!(rps.expire(&mut board, now, &mut rng));
            }
            assert!(board.everyone_assigned(all.iter()));
            for team in board.teams() {
                assert_eq!(board.size_of(team), 3, "seed {seed}, team {team}");
            }
        }
    }

    #[test]
    fn test_binary_round_with_three_teams_sends_overflow_to_third() {
        // Slot limit 3: two free seats per team.
        let (mut board, all) = seated(3, 4);
        let mut rng = StdRng::seed_from_u64(1);
        let mut rps = RpsEngine::start(&mut board, &all, 3, WINDOW, Timestamp(0), &mut rng);
        assert_eq!(rps.unresolved(), &[uid(4), uid(5), uid(6), uid(7)]);

        rps.submit(&mut board, uid(4), Hand::Rock, Timestamp(1), &mut rng).unwrap();
        rps.submit(&mut board, uid(5), Hand::Scissors, Timestamp(1), &mut rng).unwrap();
        rps.submit(&mut board, uid(6), Hand::Scissors, Timestamp(1), &mut rng).unwrap();
        rps.submit(&mut board, uid(7), Hand::Scissors, Timestamp(1), &mut rng).unwrap();

        assert!(rps.is_settled());
        assert_eq!(board.team_of(uid(4)), Some(TeamId(1)));
        assert_eq!(board.team_of(uid(5)), Some(TeamId(2)));
        assert_eq!(board.team_of(uid(6)), Some(TeamId(2)));
        assert_eq!(board.team_of(uid(7)), Some(TeamId(3)));
    }

    #[test]
    fn test_submit_rules() {
        let (mut board, all) = setup(2);
        let mut rng = StdRng::seed_from_u64(1);
        let mut rps = RpsEngine::start(&mut board, &all, 3, WINDOW, Timestamp(0), &mut rng);

        assert!(matches!(
            rps.submit(&mut board, uid(1), Hand::Rock, Timestamp(1), &mut rng),
            Err(RoomError::Conflict(Conflict::AlreadyResolved))
        ));
        assert!(matches!(
            rps.submit(&mut board, uid(9), Hand::Rock, Timestamp(1), &mut rng),
            Err(RoomError::Forbidden(Denied::NotParticipant))
        ));
        rps.submit(&mut board, uid(3), Hand::Rock, Timestamp(1), &mut rng).unwrap();
        assert!(matches!(
            rps.submit(&mut board, uid(3), Hand::Paper, Timestamp(1), &mut rng),
            Err(RoomError::Conflict(Conflict::ChoiceAlreadySubmitted))
        ));
    }

    #[test]
    fn test_single_contender_is_placed_immediately() {
        let (mut board, all) = setup(1);
        let mut rng = StdRng::seed_from_u64(1);
        let rps = RpsEngine::start(&mut board, &all, 3, WINDOW, Timestamp(0), &mut rng);
        assert!(rps.is_settled());
        assert_eq!(board.team_of(uid(3)), Some(TeamId(1)));
    }

    #[test]
    fn test_withdraw_resolves_when_rest_have_played() {
        let (mut board, all) = setup(3);
        let mut rng = StdRng::seed_from_u64(1);
        let mut rps = RpsEngine::start(&mut board, &all, 3, WINDOW, Timestamp(0), &mut rng);
        rps.submit(&mut board, uid(3), Hand::Rock, Timestamp(1), &mut rng).unwrap();
        rps.submit(&mut board, uid(4), Hand::Scissors, Timestamp(1), &mut rng).unwrap();

        rps.withdraw(&mut board, uid(5), Timestamp(2), &mut rng);

        assert!(rps.is_settled());
        assert_eq!(board.team_of(uid(3)), Some(TeamId(1)));
        assert_eq!(board.team_of(uid(4)), Some(TeamId(2)));
    }

    #[test]
    fn test_expire_before_deadline_is_noop() {
        let (mut board, all) = setup(2);
        let mut rng = StdRng::seed_from_u64(1);
        let mut rps = RpsEngine::start(&mut board, &all, 3, WINDOW, Timestamp(0), &mut rng);
        assert!(!rps.expire(&mut board, Timestamp(1), &mut rng));
        assert_eq!(rps.round(), 1);
    }
}
