//! Fixed-cadence timer for Huddle's background sweeps.
//!
//! A [`SweepTimer`] fires once per [`Cadence::interval`]. Beats that pass
//! while a sweep is still running are skipped, never replayed, so a slow
//! store cannot queue up a burst of back-to-back sweeps.
//!
//! ```rust,ignore
//! let mut timer = SweepTimer::new(Cadence::every(Duration::from_secs(30)));
//! loop {
//!     let beat = timer.next().await;
//!     reap_rooms().await;
//!     timer.finish();
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tokio::time::{Instant, sleep_until};

/// How often a sweep runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Cadence {
    pub interval: Duration,
    /// Upper bound of a random delay added before the first beat, so
    /// sweepers started together drift apart.
    pub jitter: Duration,
    /// Share of the interval a sweep may take before it is logged as slow.
    pub slow_ratio: f64,
}

impl Cadence {
    pub const MIN_INTERVAL: Duration = Duration::from_millis(10);
    const DEFAULT_SLOW_RATIO: f64 = 0.5;

    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            jitter: Duration::ZERO,
            slow_ratio: Self::DEFAULT_SLOW_RATIO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Raises tiny intervals to [`MIN_INTERVAL`](Self::MIN_INTERVAL) and
    /// pins `slow_ratio` into `0.0..=1.0`.
    pub fn normalized(mut self) -> Self {
        if self.interval < Self::MIN_INTERVAL {
            tracing::warn!(
                requested = ?self.interval,
                min = ?Self::MIN_INTERVAL,
                "sweep interval too small; raising to minimum"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        self.slow_ratio = if self.slow_ratio.is_nan() {
            Self::DEFAULT_SLOW_RATIO
        } else {
            self.slow_ratio.clamp(0.0, 1.0)
        };
        self
    }
}

/// One firing of a [`SweepTimer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beat {
    /// 1-based count of beats delivered so far.
    pub number: u64,
    /// Beats that elapsed unobserved since the previous one.
    pub skipped: u64,
    /// How far past its deadline this beat was delivered.
    pub late: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub beats: u64,
    pub skipped: u64,
    pub slow: u64,
    pub longest: Duration,
}

#[derive(Debug)]
pub struct SweepTimer {
    cadence: Cadence,
    deadline: Instant,
    running_since: Option<Instant>,
    stats: SweepStats,
}

impl SweepTimer {
    /// The first beat lands one interval (plus jitter) from now.
    pub fn new(cadence: Cadence) -> Self {
        let cadence = cadence.normalized();
        let offset = if cadence.jitter.is_zero() {
            Duration::ZERO
        } else {
            let bound = u64::try_from(cadence.jitter.as_millis()).unwrap_or(u64::MAX);
            Duration::from_millis(rand::rng().random_range(0..=bound))
        };
        Self {
            deadline: Instant::now() + cadence.interval + offset,
            cadence,
            running_since: None,
            stats: SweepStats::default(),
        }
    }

    pub fn cadence(&self) -> &Cadence {
        &self.cadence
    }

    pub fn stats(&self) -> &SweepStats {
        &self.stats
    }

    /// Waits for the next beat. Cancel-safe: dropping the future leaves the
    /// deadline where it was.
    pub async fn next(&mut self) -> Beat {
        sleep_until(self.deadline).await;

        let now = Instant::now();
        let late = now.saturating_duration_since(self.deadline);
        let mut skipped = 0;
        self.deadline += self.cadence.interval;
        while self.deadline <= now {
            self.deadline += self.cadence.interval;
            skipped += 1;
        }
        if skipped > 0 {
            tracing::debug!(skipped, ?late, "sweep beats skipped");
        }

        self.stats.beats += 1;
        self.stats.skipped += skipped;
        self.running_since = Some(now);
        Beat {
            number: self.stats.beats,
            skipped,
            late,
        }
    }

    /// Marks the sweep started by the last beat as done and returns how
    /// long it ran.
    pub fn finish(&mut self) -> Duration {
        let Some(started) = self.running_since.take() else {
            return Duration::ZERO;
        };
        let took = started.elapsed();
        self.stats.longest = self.stats.longest.max(took);
        let budget = self.cadence.interval.mul_f64(self.cadence.slow_ratio);
        if took > budget {
            self.stats.slow += 1;
            tracing::warn!(
                beat = self.stats.beats,
                took_ms = took.as_millis() as u64,
                budget_ms = budget.as_millis() as u64,
                "slow sweep"
            );
        }
        took
    }
}
