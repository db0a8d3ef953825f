//! Time sources for the scheduler.
//!
//! The scheduler samples its clock once per tick and accumulates the deltas
//! into a monotonic elapsed time. Timer deadlines are expressed on that
//! elapsed axis, never on wall-clock instants.
//!
//! [`ManualClock`] lets tests (and hosts with their own frame clock) drive
//! time explicitly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A time source.
#[derive(Debug, Clone, Default)]
pub enum Clock {
    /// Monotonic wall time.
    #[default]
    Wall,
    /// Time advanced by hand.
    Manual(ManualClock),
}

impl Clock {
    fn sample(&self) -> Sample {
        match self {
            Self::Wall => Sample::Wall(Instant::now()),
            Self::Manual(clock) => Sample::Manual(clock.now()),
        }
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    /// Creates a clock at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(nanos, Ordering::AcqRel);
    }

    /// Returns the time since creation.
    #[must_use]
    pub fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}

#[derive(Debug, Clone, Copy)]
enum Sample {
    Wall(Instant),
    Manual(Duration),
}

impl Sample {
    fn since(self, earlier: Self) -> Duration {
        match (self, earlier) {
            (Self::Wall(now), Self::Wall(then)) => now.saturating_duration_since(then),
            (Self::Manual(now), Self::Manual(then)) => now.saturating_sub(then),
            _ => Duration::ZERO,
        }
    }
}

/// Per-scheduler clock bookkeeping.
#[derive(Debug)]
pub(crate) struct ClockState {
    clock: Clock,
    last: Sample,
    elapsed: Duration,
}

impl ClockState {
    pub(crate) fn new(clock: Clock) -> Self {
        let last = clock.sample();
        Self {
            clock,
            last,
            elapsed: Duration::ZERO,
        }
    }

    /// Samples the clock and folds the delta into elapsed time.
    pub(crate) fn advance(&mut self) -> Duration {
        let now = self.clock.sample();
        let delta = now.since(self.last);
        self.last = now;
        self.elapsed = self.elapsed.saturating_add(delta);
        delta
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.elapsed
    }
}
