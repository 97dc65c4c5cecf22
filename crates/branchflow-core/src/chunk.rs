//! Timed sample chunks and push results.

use crate::ClockTime;

/// A fixed-size block of interleaved raw samples with its place on the clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleChunk {
    pts: ClockTime,
    duration: ClockTime,
    /// Index of the first frame in the stream
    offset: u64,
    frames: usize,
    data: Vec<u8>,
}

impl SampleChunk {
    /// Create a chunk from already-encoded bytes
    #[must_use]
    pub fn new(pts: ClockTime, duration: ClockTime, offset: u64, frames: usize, data: Vec<u8>) -> Self {
        Self {
            pts,
            duration,
            offset,
            frames,
            data,
        }
    }

    /// Presentation timestamp
    #[must_use]
    pub const fn pts(&self) -> ClockTime {
        self.pts
    }

    /// Time covered by the chunk's frames
    #[must_use]
    pub const fn duration(&self) -> ClockTime {
        self.duration
    }

    /// Timestamp just past the last frame of this chunk
    #[must_use]
    pub fn end(&self) -> ClockTime {
        self.pts + self.duration
    }

    /// Index of the first frame in the stream
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of frames in the payload
    #[must_use]
    pub const fn frames(&self) -> usize {
        self.frames
    }

    /// Payload size in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Get the encoded payload
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Result of pushing a chunk into a graph.
///
/// Anything other than [`FlowReturn::Ok`] tells the pusher to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowReturn {
    Ok,
    /// The consumer reached end of stream
    Eos,
    /// No downstream link exists
    NotLinked,
    /// The receiving element is not active
    Flushing,
    /// Fatal streaming error
    Error,
}

impl FlowReturn {
    /// Check if downstream accepted the data
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Flows that end a stream for good
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::NotLinked | Self::Error)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Eos => "eos",
            Self::NotLinked => "not-linked",
            Self::Flushing => "flushing",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for FlowReturn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
