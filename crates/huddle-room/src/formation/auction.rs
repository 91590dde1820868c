//! Auction: the leader nominates players one at a time and captains bid
//! for them out of a fixed budget.
//!
//! A lot closes when the leader calls it or its deadline passes. The
//! highest bid wins; equal amounts go to the earlier bid (submission time,
//! then arrival order). A lot with no usable bid sends the nominee to the
//! smallest open team.

use std::collections::BTreeMap;
use std::time::Duration;

use huddle_protocol::{Bid, BudgetView, FormationView, TeamId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

use crate::{Conflict, Denied, RoomError, TeamBoard};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Lot {
    nominee: UserId,
    deadline: Timestamp,
    bids: Vec<Bid>,
}

/// Result of closing a lot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sale {
    pub player: UserId,
    pub team: TeamId,
    pub winning_bid: Option<Bid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionEngine {
    budgets: BTreeMap<UserId, u32>,
    lot: Option<Lot>,
    next_sequence: u64,
}

fn outranks(a: &Bid, b: &Bid) -> bool {
    a.amount > b.amount
        || (a.amount == b.amount && (a.submitted_at, a.sequence) < (b.submitted_at, b.sequence))
}

impl AuctionEngine {
    /// Gives every captain on the board the same budget.
    pub fn start(board: &TeamBoard, budget: u32) -> Self {
        Self {
            budgets: board.captains().map(|(_, captain)| (captain, budget)).collect(),
            lot: None,
            next_sequence: 1,
        }
    }

    pub fn nominate(
        &mut self,
        board: &TeamBoard,
        player: UserId,
        now: Timestamp,
        window: Duration,
    ) -> Result<Timestamp, RoomError> {
        if self.lot.is_some() {
            return Err(Conflict::NominationOpen.into());
        }
        if board.is_assigned(player) {
            return Err(Conflict::AlreadyAssigned.into());
        }
        let deadline = now.saturating_add(window);
        self.lot = Some(Lot {
            nominee: player,
            deadline,
            bids: Vec::new(),
        });
        Ok(deadline)
    }

    /// Records a bid. Bids are not required to beat the current best;
    /// only the highest one is binding when the lot closes.
    pub fn bid(
        &mut self,
        board: &TeamBoard,
        bidder: UserId,
        target: UserId,
        amount: i64,
        now: Timestamp,
    ) -> Result<Bid, RoomError> {
        if amount <= 0 {
            return Err(RoomError::validation("bid amount must be positive"));
        }
        let team = board.team_captained_by(bidder).ok_or(Denied::NotCaptain)?;
        if board.is_assigned(target) {
            return Err(Conflict::AuctionClosed.into());
        }
        let lot = match self.lot.as_mut() {
            Some(lot) if lot.nominee == target => lot,
            _ => return Err(Conflict::NotNominated.into()),
        };
        if now >= lot.deadline {
            return Err(Conflict::AuctionClosed.into());
        }
        if !board.is_open(team) {
            return Err(Conflict::TeamFull(team).into());
        }
        let remaining = self.budgets.get(&bidder).copied().unwrap_or(0);
        let amount = u32::try_from(amount)
            .ok()
            .filter(|a| *a <= remaining)
            .ok_or_else(|| {
                RoomError::validation(format!("bid exceeds remaining budget of {remaining}"))
            })?;

        let bid = Bid {
            bidder,
            target,
            amount,
            submitted_at: now,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        lot.bids.push(bid.clone());
        Ok(bid)
    }

    /// Sells the current nominee.
    ///
    /// Bids from captains whose team filled up (or who lost captaincy)
    /// since bidding are ignored.
    pub fn close(&mut self, board: &mut TeamBoard) -> Result<Sale, RoomError> {
        let lot = self.lot.take().ok_or(Conflict::NoNomination)?;

        let mut best: Option<(&Bid, TeamId)> = None;
        for bid in &lot.bids {
            let Some(team) = board.team_captained_by(bid.bidder) else {
                continue;
            };
            let affordable = self.budgets.get(&bid.bidder).is_some_and(|b| *b >= bid.amount);
            if !board.is_open(team) || !affordable {
                continue;
            }
            if best.is_none_or(|(current, _)| outranks(bid, current)) {
                best = Some((bid, team));
            }
        }

        let (team, winning_bid) = match best {
            Some((bid, team)) => (team, Some(bid.clone())),
            None => {
                let team = board
                    .smallest_open_team()
                    .ok_or_else(|| RoomError::validation("no team has a free slot"))?;
                (team, None)
            }
        };

        board.assign(lot.nominee, team)?;
        if let Some(bid) = &winning_bid {
            if let Some(budget) = self.budgets.get_mut(&bid.bidder) {
                *budget -= bid.amount;
            }
        }
        Ok(Sale {
            player: lot.nominee,
            team,
            winning_bid,
        })
    }

    pub fn nominee(&self) -> Option<UserId> {
        self.lot.as_ref().map(|lot| lot.nominee)
    }

    pub fn deadline(&self) -> Option<Timestamp> {
        self.lot.as_ref().map(|lot| lot.deadline)
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        self.deadline().is_some_and(|d| now >= d)
    }

    /// Cancels the lot if `user` was up for auction. Returns `true` if a
    /// lot was cancelled.
    pub fn withdraw(&mut self, user: UserId) -> bool {
        if self.nominee() == Some(user) {
            self.lot = None;
            true
        } else {
            false
        }
    }

    pub fn remaining_budget(&self, captain: UserId) -> Option<u32> {
        self.budgets.get(&captain).copied()
    }

    pub fn view(&self, board: &TeamBoard) -> FormationView {
        let highest_bid = self.lot.as_ref().and_then(|lot| {
            lot.bids
                .iter()
                .fold(None::<&Bid>, |best, bid| match best {
                    Some(current) if !outranks(bid, current) => Some(current),
                    _ => Some(bid),
                })
                .cloned()
        });
        let budgets = board
            .captains()
            .map(|(team, captain)| BudgetView {
                captain,
                team,
                remaining: self.remaining_budget(captain).unwrap_or(0),
            })
            .collect();
        FormationView::Auction {
            slot_limit: board.slot_limit(),
            nominee: self.nominee(),
            deadline: self.deadline(),
            highest_bid,
            budgets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(30);

    fn uid(id: u64) -> UserId {
        UserId(id)
    }

    /// Captains 1 (team 1) and 2 (team 2), four active members.
    fn board() -> TeamBoard {
        let mut board = TeamBoard::new(2);
        board.appoint(TeamId(1), uid(1)).unwrap();
        board.appoint(TeamId(2), uid(2)).unwrap();
        board.begin_formation(4);
        board
    }

    #[test]
    fn test_equal_bids_go_to_the_earlier_one() {
        let mut board = board();
        let mut auction = AuctionEngine::start(&board, 100);
        auction.nominate(&board, uid(3), Timestamp(0), WINDOW).unwrap();

        auction.bid(&board, uid(2), uid(3), 40, Timestamp(10)).unwrap();
        auction.bid(&board, uid(1), uid(3), 40, Timestamp(20)).unwrap();

        let sale = auction.close(&mut board).unwrap();
        assert_eq!(sale.team, TeamId(2));
        assert_eq!(sale.winning_bid.unwrap().bidder, uid(2));
        assert_eq!(auction.remaining_budget(uid(2)), Some(60));
        assert_eq!(auction.remaining_budget(uid(1)), Some(100));
    }

    #[test]
    fn test_same_timestamp_ties_break_on_arrival() {
        let mut board = board();
        let mut auction = AuctionEngine::start(&board, 100);
        auction.nominate(&board, uid(3), Timestamp(0), WINDOW).unwrap();
        auction.bid(&board, uid(1), uid(3), 25, Timestamp(5)).unwrap();
        auction.bid(&board, uid(2), uid(3), 25, Timestamp(5)).unwrap();
        assert_eq!(auction.close(&mut board).unwrap().team, TeamId(1));
    }

    #[test]
    fn test_highest_amount_wins() {
        let mut board = board();
        let mut auction = AuctionEngine::start(&board, 100);
        auction.nominate(&board, uid(3), Timestamp(0), WINDOW).unwrap();
        auction.bid(&board, uid(1), uid(3), 30, Timestamp(1)).unwrap();
        auction.bid(&board, uid(2), uid(3), 31, Timestamp(2)).unwrap();
        assert_eq!(auction.close(&mut board).unwrap().team, TeamId(2));
    }

    #[test]
    fn test_bid_after_sale_is_rejected() {
        let mut board = board();
        let mut auction = AuctionEngine::start(&board, 100);
        auction.nominate(&board, uid(3), Timestamp(0), WINDOW).unwrap();
        auction.close(&mut board).unwrap();

        let err = auction.bid(&board, uid(1), uid(3), 10, Timestamp(1)).unwrap_err();
        assert!(matches!(err, RoomError::Conflict(Conflict::AuctionClosed)));
    }

    #[test]
    fn test_bid_after_deadline_is_rejected() {
        let board = board();
        let mut auction = AuctionEngine::start(&board, 100);
        let deadline = auction.nominate(&board, uid(3), Timestamp(0), WINDOW).unwrap();
        assert!(auction.is_due(deadline));
        let err = auction.bid(&board, uid(1), uid(3), 10, deadline).unwrap_err();
        assert!(matches!(err, RoomError::Conflict(Conflict::AuctionClosed)));
    }

    #[test]
    fn test_bid_validation() {
        let board = board();
        let mut auction = AuctionEngine::start(&board, 100);
        auction.nominate(&board, uid(3), Timestamp(0), WINDOW).unwrap();

        assert!(matches!(
            auction.bid(&board, uid(1), uid(3), 0, Timestamp(1)),
            Err(RoomError::Validation(_))
        ));
        assert!(matches!(
            auction.bid(&board, uid(1), uid(3), 101, Timestamp(1)),
            Err(RoomError::Validation(_))
        ));
        assert!(matches!(
            auction.bid(&board, uid(4), uid(3), 10, Timestamp(1)),
            Err(RoomError::Forbidden(Denied::NotCaptain))
        ));
        assert!(matches!(
            auction.bid(&board, uid(1), uid(4), 10, Timestamp(1)),
            Err(RoomError::Conflict(Conflict::NotNominated))
        ));
    }

    #[test]
    fn test_no_bids_goes_to_smallest_team() {
        let mut board = board();
        let mut auction = AuctionEngine::start(&board, 100);
        auction.nominate(&board, uid(3), Timestamp(0), WINDOW).unwrap();
        let sale = auction.close(&mut board).unwrap();
        assert_eq!(sale.team, TeamId(1));
        assert!(sale.winning_bid.is_none());

        auction.nominate(&board, uid(4), Timestamp(0), WINDOW).unwrap();
        assert_eq!(auction.close(&mut board).unwrap().team, TeamId(2));
    }

    #[test]
    fn test_one_lot_at_a_time() {
        let board = board();
        let mut auction = AuctionEngine::start(&board, 100);
        auction.nominate(&board, uid(3), Timestamp(0), WINDOW).unwrap();
        assert!(matches!(
            auction.nominate(&board, uid(4), Timestamp(0), WINDOW),
            Err(RoomError::Conflict(Conflict::NominationOpen))
        ));
    }

    #[test]
    fn test_withdraw_cancels_lot() {
        let mut board = board();
        let mut auction = AuctionEngine::start(&board, 100);
        auction.nominate(&board, uid(3), Timestamp(0), WINDOW).unwrap();
        assert!(!auction.withdraw(uid(4)));
        assert!(auction.withdraw(uid(3)));
        assert!(matches!(
            auction.close(&mut board),
            Err(RoomError::Conflict(Conflict::NoNomination))
        ));
    }
}
