//! Room reaper and deadline sweeper.
//!
//! Both are background loops on a [`SweepTimer`]. The reaper asks every
//! room to judge itself against the [`ReaperConfig`]; the sweeper nudges
//! rooms with an open auction lot or RPS round so an idle room still
//! resolves its deadline on time.

use std::fmt;
use std::sync::Arc;

use huddle_protocol::{RoomStatus, Timestamp};
use huddle_tick::{Cadence, SweepTimer};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::{ReaperConfig, RoomAggregate, RoomManager, RoomStore};

/// Why a room was reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapReason {
    /// No leaders or participants left.
    Empty,
    /// Still recruiting, with nobody but the leader, past the grace window.
    Abandoned,
    /// Completed longer ago than the retention window.
    Expired,
}

impl fmt::Display for ReapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Empty => "empty",
            Self::Abandoned => "abandoned",
            Self::Expired => "expired",
        })
    }
}

/// Decides whether `room` should be destroyed at `now`.
pub fn verdict(room: &RoomAggregate, now: Timestamp, policy: &ReaperConfig) -> Option<ReapReason> {
    if room.is_destroyed() {
        return None;
    }
    if room.active_count() == 0 {
        return Some(ReapReason::Empty);
    }
    match room.status() {
        RoomStatus::Recruiting => room
            .lonely_since()
            .filter(|since| now.since(*since) >= policy.recruiting_grace)
            .map(|_| ReapReason::Abandoned),
        RoomStatus::Completed => room
            .completed_at()
            .filter(|at| now.since(*at) >= policy.completed_retention)
            .map(|_| ReapReason::Expired),
        _ => None,
    }
}

fn timer(interval: std::time::Duration) -> SweepTimer {
    SweepTimer::new(Cadence::every(interval).with_jitter(interval / 10))
}

/// Runs [`RoomManager::sweep`] every `config.interval` until `shutdown`
/// flips or its sender is dropped.
pub fn spawn_reaper<S: RoomStore>(
    manager: Arc<RoomManager<S>>,
    config: ReaperConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut beats = timer(config.interval);
        tracing::info!(interval = ?config.interval, "room reaper started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                beat = beats.next() => {
                    let reaped = manager.sweep(&config).await;
                    if !reaped.is_empty() {
                        tracing::info!(beat = beat.number, rooms = reaped.len(), "reaper sweep");
                    }
                    beats.finish();
                }
            }
        }
        tracing::info!("room reaper stopped");
    })
}

/// Asks every room to settle overdue deadlines every
/// `config.deadline_sweep_interval`.
pub fn spawn_deadline_sweeper<S: RoomStore>(
    manager: Arc<RoomManager<S>>,
    config: ReaperConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut beats = timer(config.deadline_sweep_interval);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = beats.next() => {
                    manager.expire_deadlines().await;
                    beats.finish();
                }
            }
        }
        tracing::debug!("deadline sweeper stopped");
    })
}
