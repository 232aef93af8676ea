//! Bounded sliding-time-window history of voltage samples.

use embassy_time::{Duration, Instant};
use std::collections::VecDeque;

/// One timestamped voltage reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Monotonic time the reading arrived.
    pub timestamp: Instant,
    /// Measured output voltage.
    pub voltage: f32,
}

/// Time-ascending samples limited by age and by count.
///
/// Age is measured against the newest sample, not the wall clock, so the
/// contents depend only on the data appended.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: VecDeque<Sample>,
    max_age: Duration,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(max_age: Duration, capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(1024)),
            max_age,
            capacity,
        }
    }

    /// Window sized for one sample per `sampling_period` over `max_age`.
    pub fn for_sampling(max_age: Duration, sampling_period: Duration) -> Self {
        Self::new(max_age, Self::capacity_for(max_age, sampling_period))
    }

    /// `ceil(max_age / sampling_period) + 2`, the slack covering both edges.
    pub fn capacity_for(max_age: Duration, sampling_period: Duration) -> usize {
        let period = sampling_period.as_ticks().max(1);
        max_age.as_ticks().div_ceil(period) as usize + 2
    }

    /// Add `sample` at the tail, then evict by age and by count.
    ///
    /// Returns `false` (and stores nothing) if `sample` is older than the
    /// current tail.
    pub fn append(&mut self, sample: Sample) -> bool {
        if let Some(last) = self.samples.back() {
            if sample.timestamp < last.timestamp {
                log::debug!("Dropping out-of-order sample at {} ms", sample.timestamp.as_millis());
                return false;
            }
        }
        self.samples.push_back(sample);

        if let Some(cutoff) = sample.timestamp.checked_sub(self.max_age) {
            while self.samples.front().is_some_and(|s| s.timestamp < cutoff) {
                self.samples.pop_front();
            }
        }
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        true
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<Sample> {
        self.samples.back().copied()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }
}
