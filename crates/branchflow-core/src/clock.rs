//! Nanosecond clock arithmetic for timestamps and durations.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::time::Duration;

use crate::SampleRate;

/// A point on (or a span of) the stream clock, in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClockTime(u64);

impl ClockTime {
    pub const ZERO: Self = Self(0);
    pub const SECOND: Self = Self(1_000_000_000);

    /// Create a time from nanoseconds
    #[must_use]
    pub const fn from_nseconds(ns: u64) -> Self {
        Self(ns)
    }

    /// Get the time in nanoseconds
    #[must_use]
    pub const fn nseconds(self) -> u64 {
        self.0
    }

    /// Convert a sample count to time at `rate`: `samples * SECOND / rate`,
    /// rounded down, computed without intermediate overflow.
    ///
    /// A zero rate yields [`ClockTime::ZERO`].
    #[must_use]
    pub fn from_samples(samples: u64, rate: SampleRate) -> Self {
        if rate == 0 {
            return Self::ZERO;
        }
        let scaled = u128::from(samples) * u128::from(Self::SECOND.0) / u128::from(rate);
        Self(u64::try_from(scaled).unwrap_or(u64::MAX))
    }

    /// Difference clamped at zero
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }
}

impl Add for ClockTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for ClockTime {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for ClockTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl From<Duration> for ClockTime {
    fn from(duration: Duration) -> Self {
        Self(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl From<ClockTime> for Duration {
    fn from(time: ClockTime) -> Self {
        Self::from_nanos(time.0)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0 / Self::SECOND.0;
        let nanos = self.0 % Self::SECOND.0;
        write!(
            f,
            "{}:{:02}:{:02}.{:09}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60,
            nanos
        )
    }
}
