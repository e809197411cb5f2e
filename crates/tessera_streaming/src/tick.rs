//! # Tick Clock
//!
//! Paces the scheduler at the configured rate and times the three phases
//! of every tick (service drain, viewer updates, eviction).
//!
//! A loop that falls behind catches up by at most [`MAX_CATCH_UP`] ticks at
//! once; anything older is dropped and counted, so a long stall (a
//! synchronous `height_at`, a debugger pause) does not turn into a burst of
//! back-to-back drains.

use std::time::{Duration, Instant};

use tessera_shared::TICK_RATE;

/// Most ticks run back to back when the loop is late.
pub const MAX_CATCH_UP: u32 = 4;

/// Phases of a scheduler tick, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TickPhase {
    /// Viewer messages, one drain, replication.
    Service,
    /// Local viewer updates and presenter activations.
    Viewers,
    /// Eviction around all foci.
    Eviction,
}

impl TickPhase {
    /// Every phase, in execution order.
    pub const ALL: [Self; 3] = [Self::Service, Self::Viewers, Self::Eviction];

    /// Short label for logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Viewers => "viewers",
            Self::Eviction => "eviction",
        }
    }
}

/// Wall time spent in each phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseTimes {
    /// [`TickPhase::Service`].
    pub service: Duration,
    /// [`TickPhase::Viewers`].
    pub viewers: Duration,
    /// [`TickPhase::Eviction`].
    pub eviction: Duration,
}

impl PhaseTimes {
    /// Time of one phase.
    #[must_use]
    pub const fn get(&self, phase: TickPhase) -> Duration {
        match phase {
            TickPhase::Service => self.service,
            TickPhase::Viewers => self.viewers,
            TickPhase::Eviction => self.eviction,
        }
    }

    fn slot(&mut self, phase: TickPhase) -> &mut Duration {
        match phase {
            TickPhase::Service => &mut self.service,
            TickPhase::Viewers => &mut self.viewers,
            TickPhase::Eviction => &mut self.eviction,
        }
    }

    /// Sum over all phases.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.service + self.viewers + self.eviction
    }
}

/// Stopwatch for the phases of one tick.
#[derive(Debug)]
pub struct PhaseTimer {
    lap: Instant,
    times: PhaseTimes,
}

impl PhaseTimer {
    /// Starts timing the first phase.
    #[must_use]
    pub fn start() -> Self {
        Self {
            lap: Instant::now(),
            times: PhaseTimes::default(),
        }
    }

    /// Closes `phase` and starts the next one.
    pub fn lap(&mut self, phase: TickPhase) {
        let now = Instant::now();
        *self.times.slot(phase) += now.duration_since(self.lap);
        self.lap = now;
    }

    /// Phase times recorded so far.
    #[must_use]
    pub const fn finish(self) -> PhaseTimes {
        self.times
    }
}

/// Accumulated tick timing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Ticks recorded.
    pub ticks: u64,
    /// Ticks whose phases together took longer than the period.
    pub overruns: u64,
    /// Ticks dropped because the loop fell too far behind.
    pub skipped: u64,
    /// Slowest time seen per phase.
    pub slowest: PhaseTimes,
    /// Time summed per phase.
    pub total: PhaseTimes,
}

impl TickStats {
    /// Mean time of `phase` per tick.
    #[must_use]
    pub fn mean(&self, phase: TickPhase) -> Duration {
        let ticks = u32::try_from(self.ticks.max(1)).unwrap_or(u32::MAX);
        self.total.get(phase) / ticks
    }

    /// Mean time of a whole tick.
    #[must_use]
    pub fn mean_tick(&self) -> Duration {
        TickPhase::ALL.iter().map(|&p| self.mean(p)).sum()
    }

    /// Share of ticks that overran, in percent.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn overrun_percent(&self) -> f64 {
        self.overruns as f64 / self.ticks.max(1) as f64 * 100.0
    }

    fn record(&mut self, times: &PhaseTimes, period: Duration) {
        self.ticks += 1;
        for phase in TickPhase::ALL {
            let t = times.get(phase);
            *self.total.slot(phase) += t;
            let slowest = self.slowest.slot(phase);
            *slowest = (*slowest).max(t);
        }
        if times.total() > period {
            self.overruns += 1;
        }
    }
}

/// Fixed-rate clock driving [`crate::Scheduler::run_for`].
#[derive(Debug)]
pub struct TickClock {
    period: Duration,
    next_due: Instant,
    tick_count: u64,
    stats: TickStats,
}

impl TickClock {
    /// A clock running `tick_rate` times per second, first tick due now.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        Self::starting_at(tick_rate, Instant::now())
    }

    /// A clock whose first tick is due at `start`.
    #[must_use]
    pub fn starting_at(tick_rate: u32, start: Instant) -> Self {
        Self {
            period: Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1))),
            next_due: start,
            tick_count: 0,
            stats: TickStats::default(),
        }
    }

    /// Target time between ticks.
    #[inline]
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Number of ticks to run at `now`, advancing the schedule past them.
    #[allow(clippy::cast_possible_truncation)]
    pub fn due_ticks(&mut self, now: Instant) -> u32 {
        if now < self.next_due {
            return 0;
        }
        let behind = now.duration_since(self.next_due).as_nanos() / self.period.as_nanos().max(1);
        let owed = u64::try_from(behind).unwrap_or(u64::MAX).saturating_add(1);
        if owed > u64::from(MAX_CATCH_UP) {
            self.stats.skipped += owed - u64::from(MAX_CATCH_UP);
            self.next_due = now + self.period;
            tracing::debug!(skipped = owed - u64::from(MAX_CATCH_UP), "Tick clock fell behind");
            return MAX_CATCH_UP;
        }
        // owed <= MAX_CATCH_UP here
        let owed = owed as u32;
        self.next_due += self.period * owed;
        owed
    }

    /// Time left until the next tick is due.
    #[must_use]
    pub fn time_until_due(&self, now: Instant) -> Duration {
        self.next_due.saturating_duration_since(now)
    }

    /// Records one finished tick.
    pub fn record(&mut self, times: &PhaseTimes) {
        self.tick_count += 1;
        self.stats.record(times, self.period);
    }

    /// Ticks recorded.
    #[inline]
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Timing statistics.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Clears the statistics; the tick count keeps running.
    pub fn reset_stats(&mut self) {
        self.stats = TickStats::default();
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new(TICK_RATE)
    }
}
