//! # Scheduler
//!
//! Explicit update loop of the authority. Every tick runs, in order:
//!
//! 1. [`StreamingService::tick`] (viewer messages, drain one tile)
//! 2. [`TerrainViewer::update`] for every local viewer, forwarding
//!    activations to the presenter
//! 3. eviction around all viewer positions
//!
//! Each phase is timed; [`Scheduler::tick_stats`] keeps the totals.

use std::time::{Duration, Instant};

use tessera_shared::Vec2;

use crate::error::StreamingResult;
use crate::service::{StreamingService, TickReport};
use crate::tick::{PhaseTimer, PhaseTimes, TickClock, TickPhase, TickStats};
use crate::viewer::{TerrainViewer, ViewerUpdate};

/// Index of a local viewer.
pub type ViewerId = usize;

#[derive(Debug)]
struct LocalViewer {
    viewer: TerrainViewer,
    position: Vec2,
}

/// Result of one scheduler tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SchedulerTick {
    /// Service part of the tick.
    pub service: TickReport,
    /// One entry per local viewer, in id order.
    pub viewers: Vec<ViewerUpdate>,
    /// Tiles evicted this tick.
    pub evicted: usize,
    /// Wall time per phase.
    pub timings: PhaseTimes,
}

/// Owns the service, the local viewers and the fixed tick.
#[derive(Debug)]
pub struct Scheduler {
    service: StreamingService,
    clock: TickClock,
    viewers: Vec<LocalViewer>,
}

impl Scheduler {
    /// Wraps `service`, ticking at its configured rate.
    #[must_use]
    pub fn new(service: StreamingService) -> Self {
        let tick_rate = service.config().streaming.tick_rate;
        Self {
            service,
            clock: TickClock::new(tick_rate),
            viewers: Vec::new(),
        }
    }

    /// Adds a local viewer at `position`.
    pub fn add_viewer(&mut self, position: Vec2) -> ViewerId {
        let viewer = TerrainViewer::from_config(self.service.config());
        self.viewers.push(LocalViewer { viewer, position });
        self.viewers.len() - 1
    }

    /// Moves a viewer. Returns false for an unknown id.
    pub fn set_viewer_position(&mut self, id: ViewerId, position: Vec2) -> bool {
        let Some(local) = self.viewers.get_mut(id) else {
            return false;
        };
        local.position = position;
        true
    }

    /// Viewer by id.
    #[must_use]
    pub fn viewer(&self, id: ViewerId) -> Option<&TerrainViewer> {
        self.viewers.get(id).map(|v| &v.viewer)
    }

    /// The service.
    #[inline]
    #[must_use]
    pub fn service(&self) -> &StreamingService {
        &self.service
    }

    /// The service, mutably (edits and queries between ticks).
    #[inline]
    pub fn service_mut(&mut self) -> &mut StreamingService {
        &mut self.service
    }

    /// Tick timing.
    #[inline]
    #[must_use]
    pub fn tick_stats(&self) -> &TickStats {
        self.clock.stats()
    }

    /// Ticks executed so far.
    #[inline]
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.clock.tick_count()
    }

    /// Runs one tick immediately.
    pub fn run_tick(&mut self) -> SchedulerTick {
        let mut timer = PhaseTimer::start();
        let service = self.service.tick();
        timer.lap(TickPhase::Service);

        let mut updates = Vec::with_capacity(self.viewers.len());
        for local in &mut self.viewers {
            let update = local.viewer.update(local.position, &mut self.service);
            if let ViewerUpdate::Activated(activation) = &update {
                self.service.present_activation(activation);
            }
            updates.push(update);
        }
        timer.lap(TickPhase::Viewers);

        let foci: Vec<Vec2> = self.viewers.iter().map(|v| v.position).collect();
        let evicted = self.service.evict_far_tiles(&foci).len();
        timer.lap(TickPhase::Eviction);

        let timings = timer.finish();
        self.clock.record(&timings);
        if timings.total() > self.clock.period() {
            tracing::debug!(
                service_us = timings.service.as_micros(),
                viewers_us = timings.viewers.as_micros(),
                eviction_us = timings.eviction.as_micros(),
                "Tick over budget"
            );
        }

        SchedulerTick {
            service,
            viewers: updates,
            evicted,
            timings,
        }
    }

    /// Runs fixed ticks for `duration`, calling `between` after each tick
    /// (for moving viewers or issuing edits). Returns the ticks run.
    pub fn run_for<F>(&mut self, duration: Duration, mut between: F) -> u64
    where
        F: FnMut(&mut Self, &SchedulerTick),
    {
        let deadline = Instant::now() + duration;
        let first = self.clock.tick_count();
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            for _ in 0..self.clock.due_ticks(now) {
                let tick = self.run_tick();
                between(self, &tick);
            }
            let now = Instant::now();
            let wait = self
                .clock
                .time_until_due(now)
                .min(deadline.saturating_duration_since(now));
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
        }
        self.clock.tick_count() - first
    }

    /// Stops the service's workers.
    ///
    /// # Errors
    ///
    /// Returns the worker panic, if any.
    pub fn shutdown(mut self) -> StreamingResult<()> {
        self.service.shutdown()
    }
}
