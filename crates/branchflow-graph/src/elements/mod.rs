//! Built-in elements.
//!
//! Only the behavior the graph core depends on is modeled: the app source's
//! queue and backpressure, the tee's request ports, and what sinks do with a
//! chunk once it arrives. Converters, resamplers and the visualizer pass
//! chunks through untouched.

pub mod app_sink;
pub mod app_source;

pub use app_sink::AppSink;
pub use app_source::AppSource;

use crate::node::{ElementType, NodeProperties};

/// Runtime state of a node's element
pub enum Element {
    AppSource(AppSource),
    Tee(Tee),
    /// Queues and filters
    PassThrough(ElementType),
    /// Audio or video output device
    Render(RenderSink),
    AppSink(AppSink),
}

impl Element {
    /// Get the element's type
    #[must_use]
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::AppSource(_) => ElementType::AppSource,
            Self::Tee(_) => ElementType::Tee,
            Self::PassThrough(element_type) => *element_type,
            Self::Render(sink) => sink.element_type,
            Self::AppSink(_) => ElementType::AppSink,
        }
    }

    /// Whether the element has received end-of-stream (sinks only)
    pub(crate) fn is_eos_sink(&self) -> Option<bool> {
        match self {
            Self::Render(sink) => Some(sink.eos),
            Self::AppSink(sink) => Some(sink.is_eos()),
            Self::AppSource(_) | Self::Tee(_) | Self::PassThrough(_) => None,
        }
    }
}

/// Create an element from its type and properties
///
/// Returns a reason string when the properties do not describe a usable
/// element.
pub fn create_element(element_type: ElementType, properties: &NodeProperties) -> Result<Element, String> {
    if let Some(caps) = properties.caps {
        caps.validate().map_err(|e| e.to_string())?;
    }

    let element = match element_type {
        ElementType::AppSource => Element::AppSource(AppSource::new(properties)?),
        ElementType::Tee => Element::Tee(Tee::new(properties.max_request_ports)),
        ElementType::Queue
        | ElementType::AudioConvert
        | ElementType::AudioResample
        | ElementType::Wavescope
        | ElementType::VideoConvert => Element::PassThrough(element_type),
        ElementType::AudioSink | ElementType::VideoSink => {
            Element::Render(RenderSink::new(element_type))
        }
        ElementType::AppSink => Element::AppSink(AppSink::new(properties)?),
    };
    Ok(element)
}

/// Fan-out element state: hands out `src_%u` request ports
pub struct Tee {
    max_request_ports: Option<usize>,
    next_pad: usize,
}

impl Tee {
    fn new(max_request_ports: Option<usize>) -> Self {
        Self {
            max_request_ports,
            next_pad: 0,
        }
    }

    #[must_use]
    pub fn max_request_ports(&self) -> Option<usize> {
        self.max_request_ports
    }

    /// Name for the next request port; pad numbers are never reused
    pub(crate) fn next_port_name(&mut self) -> String {
        let name = format!("src_{}", self.next_pad);
        self.next_pad += 1;
        name
    }
}

/// Device sink: renders chunks and counts them
pub struct RenderSink {
    element_type: ElementType,
    rendered: u64,
    eos: bool,
}

impl RenderSink {
    fn new(element_type: ElementType) -> Self {
        Self {
            element_type,
            rendered: 0,
            eos: false,
        }
    }

    pub(crate) fn render(&mut self) -> branchflow_core::FlowReturn {
        if self.eos {
            return branchflow_core::FlowReturn::Eos;
        }
        self.rendered += 1;
        branchflow_core::FlowReturn::Ok
    }

    pub(crate) fn set_eos(&mut self, eos: bool) {
        self.eos = eos;
    }

    /// Chunks rendered so far
    #[must_use]
    pub fn rendered(&self) -> u64 {
        self.rendered
    }
}
