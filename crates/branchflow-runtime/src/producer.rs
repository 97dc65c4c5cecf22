//! Backpressure-driven sample producer.
//!
//! The producer is either IDLE or FEEDING. `need_data` registers an idle
//! source on the loop and starts feeding; `enough_data` removes it. While
//! feeding, every dispatch of that source calls [`SampleProducer::produce_one`],
//! which generates one chunk and pushes it downstream. A push that is not
//! `Ok` ends feeding on the spot.

use std::ops::ControlFlow;

use branchflow_core::{ClockTime, FlowReturn, SampleChunk, StreamFormat};

use crate::main_loop::{MainLoop, SourceId, Task};
use crate::oscillator::Oscillator;

/// Feeding state of a [`SampleProducer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProducerState {
    Idle,
    Feeding,
}

/// Anything a producer can push chunks into
pub trait ChunkSink {
    fn push_chunk(&mut self, chunk: SampleChunk) -> FlowReturn;
}

impl<F> ChunkSink for F
where
    F: FnMut(SampleChunk) -> FlowReturn,
{
    fn push_chunk(&mut self, chunk: SampleChunk) -> FlowReturn {
        self(chunk)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProducerError {
    #[error("Chunk of {chunk_bytes} bytes cannot hold one {frame_bytes}-byte frame")]
    ChunkTooSmall { chunk_bytes: usize, frame_bytes: usize },

    #[error("Invalid stream format: {0}")]
    InvalidFormat(String),
}

pub struct SampleProducer {
    format: StreamFormat,
    chunk_frames: usize,
    oscillator: Oscillator,
    /// Frames produced so far; the source of every timestamp
    samples: u64,
    chunks: u64,
    state: ProducerState,
    idle: Option<SourceId>,
    last_flow: FlowReturn,
}

impl SampleProducer {
    /// Producer for `format`, generating chunks of at most `chunk_bytes`
    /// bytes (rounded down to whole frames)
    pub fn new(format: StreamFormat, chunk_bytes: usize) -> Result<Self, ProducerError> {
        format
            .validate()
            .map_err(|e| ProducerError::InvalidFormat(e.to_string()))?;

        let frame_bytes = format.bytes_per_frame();
        let chunk_frames = chunk_bytes / frame_bytes;
        if chunk_frames == 0 {
            return Err(ProducerError::ChunkTooSmall {
                chunk_bytes,
                frame_bytes,
            });
        }

        Ok(Self {
            format,
            chunk_frames,
            oscillator: Oscillator::new(),
            samples: 0,
            chunks: 0,
            state: ProducerState::Idle,
            idle: None,
            last_flow: FlowReturn::Ok,
        })
    }

    /// Get the current feeding state
    #[must_use]
    pub const fn state(&self) -> ProducerState {
        self.state
    }

    /// The idle source registered while feeding
    #[must_use]
    pub const fn idle_source(&self) -> Option<SourceId> {
        self.idle
    }

    /// Get the stream format
    #[must_use]
    pub const fn format(&self) -> StreamFormat {
        self.format
    }

    /// Frames per generated chunk
    #[must_use]
    pub const fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    /// Frames generated so far
    #[must_use]
    pub const fn samples_produced(&self) -> u64 {
        self.samples
    }

    /// Chunks generated so far
    #[must_use]
    pub const fn chunks_produced(&self) -> u64 {
        self.chunks
    }

    /// Result of the most recent push
    #[must_use]
    pub const fn last_flow(&self) -> FlowReturn {
        self.last_flow
    }

    #[must_use]
    pub const fn oscillator(&self) -> &Oscillator {
        &self.oscillator
    }

    /// Downstream wants data. Starts feeding unless already feeding.
    ///
    /// Returns true if this call started feeding.
    pub fn need_data(&mut self, hint: usize, main_loop: &mut MainLoop) -> bool {
        if self.state == ProducerState::Feeding {
            return false;
        }
        tracing::info!("Start feeding ({} bytes wanted)", hint);
        self.idle = Some(main_loop.add_idle(Task::Produce));
        self.state = ProducerState::Feeding;
        true
    }

    /// Downstream is full. Stops feeding if feeding.
    ///
    /// Returns true if this call stopped feeding.
    pub fn enough_data(&mut self, main_loop: &mut MainLoop) -> bool {
        if self.state == ProducerState::Idle {
            return false;
        }
        tracing::info!("Stop feeding");
        self.cancel(main_loop);
        true
    }

    /// Deregister the idle source, if any, and go IDLE
    pub fn cancel(&mut self, main_loop: &mut MainLoop) {
        if let Some(id) = self.idle.take() {
            main_loop.remove(id);
        }
        self.state = ProducerState::Idle;
    }

    /// Generate the next chunk without pushing it
    pub fn next_chunk(&mut self) -> SampleChunk {
        let frames = self.chunk_frames;
        let mut data = Vec::with_capacity(frames * self.format.bytes_per_frame());
        self.oscillator.fill(&self.format, frames, &mut data);

        let rate = self.format.sample_rate;
        let start = self.samples;
        let end = start + frames as u64;
        // Both ends come from the running count, so chunks tile exactly
        let pts = ClockTime::from_samples(start, rate);
        let duration = ClockTime::from_samples(end, rate) - pts;

        self.samples = end;
        self.chunks += 1;
        SampleChunk::new(pts, duration, start, frames, data)
    }

    /// Idle callback body: generate one chunk and push it.
    ///
    /// Returns `Break` when the push was not `Ok`; the producer is then IDLE
    /// and the caller must not dispatch its idle source again.
    pub fn produce_one(&mut self, sink: &mut impl ChunkSink) -> ControlFlow<()> {
        let chunk = self.next_chunk();
        let flow = sink.push_chunk(chunk);
        self.last_flow = flow;

        if flow.is_ok() {
            return ControlFlow::Continue(());
        }

        tracing::warn!("Push returned {}, stop feeding", flow);
        self.idle = None;
        self.state = ProducerState::Idle;
        ControlFlow::Break(())
    }
}
