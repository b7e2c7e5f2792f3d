//! Linear fade-out envelope.

use std::time::{Duration, Instant};

/// Amplitude multiplier `elapsed` seconds into a fade lasting `duration`
/// seconds. Falls linearly from 1 to 0 and stays at 0.
pub fn amplitude_at(elapsed: f64, duration: f64) -> f64 {
    if duration <= 0.0 {
        return 0.0;
    }
    (1.0 - elapsed / duration).clamp(0.0, 1.0)
}

/// Recenter a raw sample around 128 and scale its excursion.
pub fn scale_sample(sample: u8, multiplier: f64) -> u8 {
    ((f64::from(sample) - 128.0) * multiplier + 128.0) as u8
}

/// Envelope state for one fade, created when the stream starts fading.
///
/// Elapsed time is counted in emitted samples at the rate in force for each
/// block, so the decay follows the audio timeline across rate changes. The
/// clock-side start is kept for the stop deadline.
#[derive(Debug, Clone)]
pub struct FadeContext {
    started_at: Instant,
    duration: Duration,
    // Seconds covered by samples emitted at earlier rates.
    settled: f64,
    sample_rate: u32,
    samples_at_rate: u64,
}

impl FadeContext {
    pub fn new(started_at: Instant, duration: Duration) -> Self {
        Self {
            started_at,
            duration,
            settled: 0.0,
            sample_rate: 0,
            samples_at_rate: 0,
        }
    }

    /// Seconds of audio scaled so far.
    pub fn elapsed(&self) -> f64 {
        if self.sample_rate == 0 {
            return self.settled;
        }
        self.settled + self.samples_at_rate as f64 / f64::from(self.sample_rate)
    }

    /// Multiplier for the next sample to be scaled.
    pub fn current_amplitude(&self) -> f64 {
        amplitude_at(self.elapsed(), self.duration.as_secs_f64())
    }

    /// Scale `samples`, which play at `sample_rate`, in place and advance
    /// the envelope by their duration.
    pub fn apply(&mut self, samples: &mut [u8], sample_rate: u32) {
        if sample_rate != self.sample_rate {
            self.settled = self.elapsed();
            self.sample_rate = sample_rate;
            self.samples_at_rate = 0;
        }
        for sample in samples.iter_mut() {
            *sample = scale_sample(*sample, self.current_amplitude());
            self.samples_at_rate += 1;
        }
    }

    /// Whether the fade has run its course at clock time `now`.
    pub fn is_finished(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started_at) >= self.duration
    }
}
