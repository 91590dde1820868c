//! # Huddle
//!
//! Lobby server for custom games. Players open rooms, recruit, split into
//! teams (free pick, captain auction or rock-paper-scissors), draft lane
//! roles or run a single-elimination bracket, and see every change pushed
//! to them as it happens.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use huddle::{HuddleServerBuilder, ServerConfig};
//! use huddle_room::MemoryRoomStore;
//! use huddle_session::DevIdentityProvider;
//!
//! # async fn demo() -> Result<(), huddle::HuddleError> {
//! let server = HuddleServerBuilder::new()
//!     .config(ServerConfig::from_env())
//!     .build(DevIdentityProvider, Arc::new(MemoryRoomStore::new()))
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::ServerConfig;
pub use error::HuddleError;
pub use server::{HuddleServer, HuddleServerBuilder};
