//! Stream formats and the caps descriptors attached to ports.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ChannelCount, Error, SampleRate};

/// Raw sample encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Signed 16-bit little endian
    S16LE,
    /// 32-bit float little endian
    F32LE,
}

impl SampleFormat {
    /// Size of one sample of one channel, in bytes
    #[must_use]
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::S16LE => 2,
            Self::F32LE => 4,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::S16LE => "S16LE",
            Self::F32LE => "F32LE",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s16" | "s16le" => Ok(Self::S16LE),
            "f32" | "f32le" => Ok(Self::F32LE),
            other => Err(Error::Format(format!("unknown sample format '{other}'"))),
        }
    }
}

/// Raw audio format agreed for a whole session.
///
/// Interleaved samples, `channels` per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamFormat {
    pub format: SampleFormat,
    pub sample_rate: SampleRate,
    pub channels: ChannelCount,
}

impl StreamFormat {
    /// Create a new stream format
    #[must_use]
    pub const fn new(format: SampleFormat, sample_rate: SampleRate, channels: ChannelCount) -> Self {
        Self {
            format,
            sample_rate,
            channels,
        }
    }

    /// Size of one interleaved frame in bytes
    #[must_use]
    pub const fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    /// Check that the format describes something that can carry samples
    pub fn validate(&self) -> crate::Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Format("sample rate must be non-zero".into()));
        }
        if self.channels == 0 {
            return Err(Error::Format("channel count must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self::new(SampleFormat::S16LE, crate::sample_rates::SR_44100, 1)
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "audio/x-raw, format={}, rate={}, channels={}",
            self.format, self.sample_rate, self.channels
        )
    }
}

/// Capability descriptor of a port.
///
/// `Audio(None)` accepts any raw audio, `Audio(Some(..))` exactly one format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Caps {
    Any,
    Audio(Option<StreamFormat>),
    Video,
}

impl Caps {
    /// Common subset of two descriptors, `None` when they cannot agree.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        match (*self, *other) {
            (Self::Any, caps) | (caps, Self::Any) => Some(caps),
            (Self::Video, Self::Video) => Some(Self::Video),
            (Self::Audio(None), Self::Audio(fixed)) | (Self::Audio(fixed), Self::Audio(None)) => {
                Some(Self::Audio(fixed))
            }
            (Self::Audio(Some(a)), Self::Audio(Some(b))) if a == b => Some(Self::Audio(Some(a))),
            _ => None,
        }
    }

    /// Whether two descriptors have a non-empty intersection
    #[must_use]
    pub fn can_intersect(&self, other: &Self) -> bool {
        self.intersect(other).is_some()
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("ANY"),
            Self::Audio(None) => f.write_str("audio/x-raw"),
            Self::Audio(Some(format)) => write!(f, "{format}"),
            Self::Video => f.write_str("video/x-raw"),
        }
    }
}
