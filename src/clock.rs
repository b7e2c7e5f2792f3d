use std::cell::Cell;
use std::time::{Duration, Instant};

/// Time source for run and fade deadlines.
pub trait Clock {
    fn now(&self) -> Instant;

    /// Called after `samples` have been handed to the sink at `sample_rate`.
    fn advance(&self, _samples: usize, _sample_rate: u32) {}
}

/// Wall-clock time; the blocking sink keeps it in step with the audio.
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Virtual time that only moves as audio is emitted. Used when rendering
/// faster than realtime and in tests.
#[derive(Debug)]
pub struct SampleClock {
    origin: Instant,
    elapsed: Cell<Duration>,
}

impl SampleClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Cell::new(Duration::ZERO),
        }
    }
}

impl Default for SampleClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SampleClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed.get()
    }

    fn advance(&self, samples: usize, sample_rate: u32) {
        let step = Duration::from_secs_f64(samples as f64 / f64::from(sample_rate));
        self.elapsed.set(self.elapsed.get() + step);
    }
}
