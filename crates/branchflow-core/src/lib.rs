//! Core types shared across the branchflow crates.
//!
//! Everything here is plain data: stream formats, clock arithmetic, the timed
//! sample chunks that travel through a graph, and the flow results returned by
//! push operations. No I/O happens in this crate.

pub mod chunk;
pub mod clock;
pub mod format;

pub use chunk::{FlowReturn, SampleChunk};
pub use clock::ClockTime;
pub use format::{Caps, SampleFormat, StreamFormat};

/// Sample rate in Hz
pub type SampleRate = u32;

/// Number of audio frames (samples per channel)
pub type Frames = usize;

/// Number of audio channels
pub type ChannelCount = u16;

/// Common sample rates
pub mod sample_rates {
    use super::SampleRate;

    /// 44.1 kHz sample rate (CD quality)
    pub const SR_44100: SampleRate = 44100;
}

/// Identifier of a node inside one graph.
///
/// Ids are assigned sequentially by the graph that owns the node and are never
/// reused within that graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl NodeId {
    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Common error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Stream format could not be expressed or parsed
    #[error("Format error: {0}")]
    Format(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;
