//! Custom-game lifecycle engine.
//!
//! A room moves through a fixed set of phases:
//!
//! ```text
//! recruiting → leader election → team formation → role selection → in progress → completed
//!      └──────────────→ tournament bracket ─────────────────────────────────────→ completed
//! ```
//!
//! [`RoomAggregate`] holds one room's state and every rule about changing
//! it. [`RoomManager`] gives each room its own actor task, so changes to a
//! room are serialized while different rooms run in parallel. Committed
//! changes are persisted through a [`RoomStore`] and then fanned out to
//! subscribers via [`FanOut`].
//!
//! ```rust,no_run
//! use huddle_protocol::{RoomStatus, UserId};
//! use huddle_room::{RoomManager, RoomSettings};
//!
//! # async fn demo() -> Result<(), huddle_room::RoomError> {
//! let manager = RoomManager::in_memory();
//! let room = manager
//!     .create_room(UserId(1), "host", RoomSettings { capacity: 4, ..Default::default() })
//!     .await?;
//! manager.join(room.room_id, UserId(2), "guest", None).await?;
//! manager.advance_phase(room.room_id, UserId(1), RoomStatus::LeaderElection).await?;
//! # Ok(())
//! # }
//! ```

mod aggregate;
mod bracket;
mod clock;
mod config;
mod draft;
mod error;
mod fanout;
mod formation;
mod ledger;
mod manager;
pub mod phase;
mod reaper;
mod room;
mod store;
mod succession;
mod teams;

pub use aggregate::{ActionContext, LeaveOutcome, ReportOutcome, RoomAggregate};
pub use bracket::Bracket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LobbyConfig, ReaperConfig, RoomSettings};
pub use draft::RoleDraft;
pub use error::{Conflict, Denied, Missing, RoomError, StorageError};
pub use fanout::{FanOut, Publication, Topic};
pub use formation::{AuctionEngine, Formation, FreeJoin, RpsEngine, Sale};
pub use ledger::{Ledger, Member};
pub use manager::{LeaveReply, ReportReply, RoomManager};
pub use phase::{PhaseError, Requirement};
pub use reaper::{ReapReason, spawn_deadline_sweeper, spawn_reaper, verdict};
pub use room::{Action, ActionReply, Outcome, RoomHandle};
pub use store::{MemoryRoomStore, RoomStore};
pub use succession::successor;
pub use teams::TeamBoard;
