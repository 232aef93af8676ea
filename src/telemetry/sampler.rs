//! Scheduling state of the periodic measurement loop.
//!
//! The sampler does no I/O itself. The link task asks it when the next tick
//! is due, dispatches a measurement request when a tick yields a generation,
//! and hands the result back through [`Sampler::accept`]. A result whose
//! generation no longer matches is dropped, which is how a stopped or
//! restarted sampler cancels requests that are still on the wire.

use embassy_time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Sampler {
    period: Duration,
    generation: u64,
    active: bool,
    next_tick: Option<Instant>,
    in_flight: bool,
}

impl Sampler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            generation: 0,
            active: false,
            next_tick: None,
            in_flight: false,
        }
    }

    /// Re-evaluate the activation predicate.
    ///
    /// Starting schedules the first tick one period after `now`; stopping
    /// disarms the tick. Both bump the generation. Returns `true` if the
    /// sampler changed between running and stopped.
    pub fn update(&mut self, active: bool, now: Instant) -> bool {
        if active == self.active {
            return false;
        }
        self.active = active;
        self.generation = self.generation.wrapping_add(1);
        self.in_flight = false;
        self.next_tick = if active { Some(now + self.period) } else { None };
        true
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_tick
    }

    /// Handle an elapsed tick.
    ///
    /// Returns the generation to tag a new measurement request with, or
    /// `None` if the tick is not due yet or the previous request of this
    /// generation is still outstanding. Missed ticks are not replayed.
    pub fn on_tick(&mut self, now: Instant) -> Option<u64> {
        let due = self.next_tick?;
        if now < due {
            return None;
        }
        let following = due + self.period;
        self.next_tick = Some(if following > now { following } else { now + self.period });

        if self.in_flight {
            log::debug!("Measurement still outstanding, skipping tick");
            return None;
        }
        self.in_flight = true;
        Some(self.generation)
    }

    /// Handle a finished measurement request.
    ///
    /// Returns `true` if its result belongs to the running generation and may
    /// be recorded.
    pub fn accept(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.in_flight = false;
        self.active
    }
}
