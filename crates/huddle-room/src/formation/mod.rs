//! Team-formation mini-engines, one per [`TeamFormationMode`].

mod auction;
mod free;
mod rps;

pub use auction::{AuctionEngine, Sale};
pub use free::FreeJoin;
pub use rps::RpsEngine;

use huddle_protocol::{FormationView, TeamFormationMode, Timestamp, UserId};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::{LobbyConfig, TeamBoard};

/// The engine running while a room is in team formation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Formation {
    Free(FreeJoin),
    Auction(AuctionEngine),
    Rps(RpsEngine),
}

impl Formation {
    /// Starts the engine for `mode`. The board must already have its slot
    /// limit fixed and captains seated.
    pub fn start(
        mode: TeamFormationMode,
        board: &mut TeamBoard,
        contenders: &[UserId],
        config: &LobbyConfig,
        now: Timestamp,
        rng: &mut dyn RngCore,
    ) -> Self {
        match mode {
            TeamFormationMode::Free => Self::Free(FreeJoin::start(board)),
            TeamFormationMode::Auction => {
                Self::Auction(AuctionEngine::start(board, config.auction_budget))
            }
            TeamFormationMode::RockPaperScissors => Self::Rps(RpsEngine::start(
                board,
                contenders,
                config.rps_round_cap,
                config.rps_round_window,
                now,
                rng,
            )),
        }
    }

    pub fn deadline(&self) -> Option<Timestamp> {
        match self {
            Self::Free(_) => None,
            Self::Auction(engine) => engine.deadline(),
            Self::Rps(engine) => engine.deadline(),
        }
    }

    pub fn is_due(&self, now: Timestamp) -> bool {
        match self {
            Self::Free(_) => false,
            Self::Auction(engine) => engine.is_due(now),
            Self::Rps(engine) => engine.is_due(now),
        }
    }

    /// Applies whatever deadline has passed. Returns `true` if state changed.
    pub fn expire(&mut self, board: &mut TeamBoard, now: Timestamp, rng: &mut dyn RngCore) -> bool {
        match self {
            Self::Free(_) => false,
            Self::Auction(engine) => {
                if !engine.is_due(now) {
                    return false;
                }
                match engine.close(board) {
                    Ok(sale) => tracing::debug!(
                        player = %sale.player,
                        team = %sale.team,
                        price = sale.winning_bid.as_ref().map_or(0, |b| b.amount),
                        "auction lot expired"
                    ),
                    Err(e) => tracing::warn!(error = %e, "expired auction lot could not be sold"),
                }
                true
            }
            Self::Rps(engine) => engine.expire(board, now, rng),
        }
    }

    /// Removes a departing member from whatever the engine is tracking.
    pub fn withdraw(&mut self, board: &mut TeamBoard, user: UserId, now: Timestamp, rng: &mut dyn RngCore) {
        match self {
            Self::Free(_) => {}
            Self::Auction(engine) => {
                engine.withdraw(user);
            }
            Self::Rps(engine) => engine.withdraw(board, user, now, rng),
        }
    }

    pub fn view(&self, board: &TeamBoard) -> FormationView {
        match self {
            Self::Free(engine) => engine.view(board),
            Self::Auction(engine) => engine.view(board),
            Self::Rps(engine) => engine.view(board),
        }
    }
}
