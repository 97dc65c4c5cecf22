//! Chirped self-modulating oscillator.
//!
//! Two coupled recurrences: a slow one (drift `c`, drift velocity `d`) steps
//! once per chunk and sets the frequency divisor `f = 1100 + 1000 * d`; a fast
//! one (position `p`, velocity `v`) steps once per sample and produces the
//! tone. The velocity is the output sample.

use branchflow_core::{SampleFormat, StreamFormat};
use dasp::Sample;

/// Divisor of the slow recurrence
pub const DRIFT_PERIOD: f64 = 1000.0;

/// Frequency divisor when the drift velocity is zero
pub const BASE_FREQUENCY: f64 = 1100.0;

/// How far the drift velocity moves the frequency divisor
pub const FREQUENCY_DEPTH: f64 = 1000.0;

/// Smallest frequency divisor used. Below it the per-sample update diverges.
pub const MIN_FREQUENCY: f64 = 1.0;

/// Velocity is divided by this before encoding, keeping the swept tone
/// inside full scale
pub const AMPLITUDE_SCALE: f64 = 4.0;

/// Oscillator accumulators. Persist across chunks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Oscillator {
    position: f64,
    velocity: f64,
    drift: f64,
    drift_velocity: f64,
}

impl Oscillator {
    /// Oscillator at rest with unit velocity and unit drift velocity
    #[must_use]
    pub const fn new() -> Self {
        Self::with_state(0.0, 1.0, 0.0, 1.0)
    }

    /// Oscillator with explicit accumulators
    #[must_use]
    pub const fn with_state(position: f64, velocity: f64, drift: f64, drift_velocity: f64) -> Self {
        Self {
            position,
            velocity,
            drift,
            drift_velocity,
        }
    }

    #[must_use]
    pub const fn position(&self) -> f64 {
        self.position
    }

    #[must_use]
    pub const fn velocity(&self) -> f64 {
        self.velocity
    }

    #[must_use]
    pub const fn drift(&self) -> f64 {
        self.drift
    }

    #[must_use]
    pub const fn drift_velocity(&self) -> f64 {
        self.drift_velocity
    }

    /// Step the slow recurrence and return the frequency divisor for the
    /// next chunk, never below [`MIN_FREQUENCY`]
    pub fn begin_chunk(&mut self) -> f64 {
        self.drift += self.drift_velocity;
        self.drift_velocity -= self.drift / DRIFT_PERIOD;

        if !self.drift.is_finite() || !self.drift_velocity.is_finite() {
            let initial = Self::new();
            self.drift = initial.drift;
            self.drift_velocity = initial.drift_velocity;
        }

        let frequency = FREQUENCY_DEPTH.mul_add(self.drift_velocity, BASE_FREQUENCY);
        // NaN fails the comparison too
        if frequency >= MIN_FREQUENCY {
            frequency
        } else {
            MIN_FREQUENCY
        }
    }

    /// Step the fast recurrence and return the normalized sample in [-1, 1]
    pub fn next_sample(&mut self, frequency: f64) -> f64 {
        let frequency = if frequency >= MIN_FREQUENCY {
            frequency
        } else {
            MIN_FREQUENCY
        };

        self.position += self.velocity;
        self.velocity -= self.position / frequency;

        if !self.position.is_finite() || !self.velocity.is_finite() {
            let initial = Self::new();
            self.position = initial.position;
            self.velocity = initial.velocity;
            return 0.0;
        }

        (self.velocity / AMPLITUDE_SCALE).clamp(-1.0, 1.0)
    }

    /// Generate `frames` frames in `format`, appending the encoded bytes to
    /// `out`. Each frame repeats the sample on every channel.
    pub fn fill(&mut self, format: &StreamFormat, frames: usize, out: &mut Vec<u8>) {
        let frequency = self.begin_chunk();
        out.reserve(frames * format.bytes_per_frame());

        for _ in 0..frames {
            let sample = self.next_sample(frequency);
            for _ in 0..format.channels {
                match format.format {
                    SampleFormat::S16LE => out.extend_from_slice(&sample.to_sample::<i16>().to_le_bytes()),
                    SampleFormat::F32LE => out.extend_from_slice(&sample.to_sample::<f32>().to_le_bytes()),
                }
            }
        }
    }
}

impl Default for Oscillator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let osc = Oscillator::default();
        assert_eq!(osc.position(), 0.0);
        assert_eq!(osc.velocity(), 1.0);
        assert_eq!(osc.drift(), 0.0);
        assert_eq!(osc.drift_velocity(), 1.0);
    }

    #[test]
    fn test_first_chunk_frequency() {
        let mut osc = Oscillator::new();
        let f = osc.begin_chunk();
        // c = 1, d = 1 - 1/1000
        assert_eq!(osc.drift(), 1.0);
        assert!((osc.drift_velocity() - 0.999).abs() < 1e-12);
        assert!((f - 2099.0).abs() < 1e-9);
    }

    #[test]
    fn test_recurrence_step() {
        let mut osc = Oscillator::new();
        let sample = osc.next_sample(2.0);
        // p = 1, v = 1 - 1/2
        assert_eq!(osc.position(), 1.0);
        assert_eq!(osc.velocity(), 0.5);
        assert_eq!(sample, 0.5 / AMPLITUDE_SCALE);
    }

    #[test]
    fn test_frequency_floor() {
        let mut osc = Oscillator::with_state(0.0, 1.0, 0.0, -5.0);
        assert_eq!(osc.begin_chunk(), MIN_FREQUENCY);

        let mut osc = Oscillator::with_state(0.0, 1.0, f64::NAN, 0.0);
        assert!(osc.begin_chunk() >= MIN_FREQUENCY);
        assert!(osc.drift().is_finite());
    }

    #[test]
    fn test_non_finite_resets() {
        let mut osc = Oscillator::with_state(f64::MAX, f64::MAX, 0.0, 1.0);
        assert_eq!(osc.next_sample(1.0), 0.0);
        assert_eq!(osc.position(), 0.0);
        assert_eq!(osc.velocity(), 1.0);
    }

    #[test]
    fn test_fill_s16_stereo() {
        let format = StreamFormat::new(SampleFormat::S16LE, 44100, 2);
        let mut osc = Oscillator::new();
        let mut out = Vec::new();
        osc.fill(&format, 4, &mut out);

        assert_eq!(out.len(), 16);
        // Channels carry the same sample
        for frame in out.chunks_exact(4) {
            assert_eq!(frame[..2], frame[2..]);
        }
    }

    #[test]
    fn test_fill_f32_in_range() {
        let format = StreamFormat::new(SampleFormat::F32LE, 48000, 1);
        let mut osc = Oscillator::new();
        let mut out = Vec::new();
        for _ in 0..100 {
            out.clear();
            osc.fill(&format, 256, &mut out);
            for bytes in out.chunks_exact(4) {
                let sample = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                assert!(sample.is_finite());
                assert!((-1.0..=1.0).contains(&sample));
            }
        }
    }
}
