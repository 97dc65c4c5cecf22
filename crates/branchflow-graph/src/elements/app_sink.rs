//! Application sink: keeps the most recent chunks for the application to pull.

use branchflow_core::{FlowReturn, SampleChunk, StreamFormat};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::node::NodeProperties;

/// Default ring capacity in chunks
pub const DEFAULT_MAX_BUFFERS: usize = 64;

/// Bounded sample store. When full, the oldest chunk is dropped to make room.
pub struct AppSink {
    caps: Option<StreamFormat>,
    producer: Producer<SampleChunk>,
    consumer: Consumer<SampleChunk>,
    received: u64,
    dropped: u64,
    eos: bool,
}

impl AppSink {
    pub(crate) fn new(properties: &NodeProperties) -> Result<Self, String> {
        let capacity = properties.max_buffers.unwrap_or(DEFAULT_MAX_BUFFERS);
        if capacity == 0 {
            return Err("max_buffers must be non-zero".into());
        }
        let (producer, consumer) = RingBuffer::new(capacity);
        Ok(Self {
            caps: properties.caps,
            producer,
            consumer,
            received: 0,
            dropped: 0,
            eos: false,
        })
    }

    /// The fixed format this sink accepts, if any
    #[must_use]
    pub fn caps(&self) -> Option<StreamFormat> {
        self.caps
    }

    pub(crate) fn render(&mut self, chunk: &SampleChunk) -> FlowReturn {
        if self.eos {
            return FlowReturn::Eos;
        }
        if self.producer.is_full() && self.consumer.pop().is_ok() {
            self.dropped += 1;
            tracing::warn!("App sink full, dropped oldest sample ({} total)", self.dropped);
        }
        if self.producer.push(chunk.clone()).is_err() {
            self.dropped += 1;
            return FlowReturn::Ok;
        }
        self.received += 1;
        FlowReturn::Ok
    }

    /// Take the oldest stored chunk
    pub fn pull(&mut self) -> Option<SampleChunk> {
        self.consumer.pop().ok()
    }

    /// Chunks waiting to be pulled
    #[must_use]
    pub fn available(&self) -> usize {
        self.consumer.slots()
    }

    /// Chunks stored since creation
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Chunks discarded because the sink was full
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Check if end-of-stream reached this sink
    #[must_use]
    pub fn is_eos(&self) -> bool {
        self.eos
    }

    pub(crate) fn set_eos(&mut self, eos: bool) {
        self.eos = eos;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchflow_core::ClockTime;

    fn chunk(pts: u64) -> SampleChunk {
        SampleChunk::new(
            ClockTime::from_nseconds(pts),
            ClockTime::from_nseconds(1),
            pts,
            1,
            vec![0; 2],
        )
    }

    fn sink(max_buffers: usize) -> AppSink {
        AppSink::new(&NodeProperties {
            max_buffers: Some(max_buffers),
            ..NodeProperties::default()
        })
        .unwrap()
    }

    #[test]
    fn test_pull_in_order() {
        let mut sink = sink(4);
        sink.render(&chunk(0));
        sink.render(&chunk(1));

        assert_eq!(sink.available(), 2);
        assert_eq!(sink.pull().unwrap().offset(), 0);
        assert_eq!(sink.pull().unwrap().offset(), 1);
        assert!(sink.pull().is_none());
    }

    #[test]
    fn test_full_ring_drops_oldest() {
        let mut sink = sink(2);
        for pts in 0..3 {
            assert!(sink.render(&chunk(pts)).is_ok());
        }

        assert_eq!(sink.dropped(), 1);
        assert_eq!(sink.received(), 3);
        assert_eq!(sink.pull().unwrap().offset(), 1);
        assert_eq!(sink.pull().unwrap().offset(), 2);
    }

    #[test]
    fn test_eos_refuses_samples() {
        let mut sink = sink(2);
        sink.set_eos(true);
        assert_eq!(sink.render(&chunk(0)), FlowReturn::Eos);
        assert_eq!(sink.available(), 0);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(
            AppSink::new(&NodeProperties {
                max_buffers: Some(0),
                ..NodeProperties::default()
            })
            .is_err()
        );
    }
}
