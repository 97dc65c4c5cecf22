//! Application-fed source element.
//!
//! The application pushes timed chunks into a bounded queue; the graph drains
//! it as the clock advances. Queue level drives the backpressure signals:
//!
//! - `EnoughData` once the level reaches `max_bytes`
//! - `NeedData` once the level falls to `max_bytes * min_percent / 100`,
//!   and once on activation
//!
//! Each signal is emitted once per crossing, not on every push.

use std::collections::VecDeque;

use branchflow_comms::ElementSignal;
use branchflow_core::{ClockTime, FlowReturn, SampleChunk, StreamFormat};

use crate::node::NodeProperties;

/// Default queue limit in bytes
pub const DEFAULT_MAX_BYTES: usize = 200_000;

pub struct AppSource {
    format: StreamFormat,
    max_bytes: usize,
    min_percent: u8,
    queue: VecDeque<SampleChunk>,
    queued_bytes: usize,
    need_data_sent: bool,
    enough_data_sent: bool,
    /// End-of-stream requested by the application
    eos: bool,
    eos_sent: bool,
    /// Last downstream flow; anything but `Ok` ends streaming
    flow: FlowReturn,
}

impl AppSource {
    pub(crate) fn new(properties: &NodeProperties) -> Result<Self, String> {
        let format = properties
            .caps
            .ok_or_else(|| "app source requires fixed caps".to_string())?;
        let max_bytes = properties.max_bytes.unwrap_or(DEFAULT_MAX_BYTES);
        if max_bytes == 0 {
            return Err("max_bytes must be non-zero".into());
        }
        let min_percent = properties.min_percent.unwrap_or(0);
        if min_percent > 100 {
            return Err(format!("min_percent {min_percent} exceeds 100"));
        }

        Ok(Self {
            format,
            max_bytes,
            min_percent,
            queue: VecDeque::new(),
            queued_bytes: 0,
            need_data_sent: false,
            enough_data_sent: false,
            eos: false,
            eos_sent: false,
            flow: FlowReturn::Ok,
        })
    }

    /// The fixed format of everything pushed into this source
    #[must_use]
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Queue size at which the source reports it has enough data
    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Bytes currently queued
    #[must_use]
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    /// Chunks waiting to be released downstream, oldest first
    pub fn queued(&self) -> impl Iterator<Item = &SampleChunk> {
        self.queue.iter()
    }

    #[must_use]
    pub fn is_eos(&self) -> bool {
        self.eos
    }

    fn low_watermark(&self) -> usize {
        self.max_bytes * usize::from(self.min_percent) / 100
    }

    /// Queue a chunk. `active` is the owning node's activation state.
    pub(crate) fn push(&mut self, chunk: SampleChunk, active: bool) -> (FlowReturn, Option<ElementSignal>) {
        if !active {
            return (FlowReturn::Flushing, None);
        }
        if self.eos || self.flow == FlowReturn::Eos {
            return (FlowReturn::Eos, None);
        }
        if !self.flow.is_ok() {
            return (FlowReturn::Error, None);
        }

        self.queued_bytes += chunk.size();
        self.queue.push_back(chunk);

        if self.queued_bytes > self.low_watermark() {
            self.need_data_sent = false;
        }
        if self.queued_bytes >= self.max_bytes && !self.enough_data_sent {
            self.enough_data_sent = true;
            return (FlowReturn::Ok, Some(ElementSignal::EnoughData));
        }
        (FlowReturn::Ok, None)
    }

    /// Reset for a fresh activation and ask for the first data
    pub(crate) fn activate(&mut self) -> ElementSignal {
        self.clear();
        self.flow = FlowReturn::Ok;
        self.eos = false;
        self.eos_sent = false;
        self.need_data_sent = true;
        ElementSignal::NeedData {
            hint: self.max_bytes,
        }
    }

    pub(crate) fn deactivate(&mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.queued_bytes = 0;
        self.need_data_sent = false;
        self.enough_data_sent = false;
    }

    /// Next queued chunk whose timestamp is at or before `running_time`
    pub(crate) fn pop_due(&mut self, running_time: ClockTime) -> Option<SampleChunk> {
        if !self.flow.is_ok() || self.queue.front()?.pts() > running_time {
            return None;
        }
        let chunk = self.queue.pop_front()?;
        self.queued_bytes -= chunk.size();
        if self.queued_bytes < self.max_bytes {
            self.enough_data_sent = false;
        }
        Some(chunk)
    }

    /// `NeedData` if the queue has drained to the refill threshold
    pub(crate) fn refill_signal(&mut self) -> Option<ElementSignal> {
        if self.need_data_sent || self.eos || !self.flow.is_ok() {
            return None;
        }
        if self.queued_bytes > self.low_watermark() {
            return None;
        }
        self.need_data_sent = true;
        Some(ElementSignal::NeedData {
            hint: self.max_bytes - self.queued_bytes,
        })
    }

    pub(crate) fn end_of_stream(&mut self) {
        self.eos = true;
    }

    /// True exactly once: when end-of-stream was requested and the queue is empty
    pub(crate) fn take_pending_eos(&mut self) -> bool {
        if self.eos && !self.eos_sent && self.queue.is_empty() {
            self.eos_sent = true;
            return true;
        }
        false
    }

    /// Record a non-OK downstream flow; streaming stops until reactivation
    pub(crate) fn set_flow(&mut self, flow: FlowReturn) {
        self.flow = flow;
    }

    /// Result of the last push downstream
    #[must_use]
    pub fn flow(&self) -> FlowReturn {
        self.flow
    }
}
