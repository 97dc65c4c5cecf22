//! Node kinds, element types and the specs nodes are built from.

use branchflow_core::{Caps, NodeId, StreamFormat};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

use crate::elements::Element;
use crate::port::{PortId, PortTemplate};

/// Role of a node in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Source,
    Fanout,
    Filter,
    Sink,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Source => "source",
            Self::Fanout => "fanout",
            Self::Filter => "filter",
            Self::Sink => "sink",
        })
    }
}

/// The closed set of elements a graph can be built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    /// Application-fed source with a bounded queue and backpressure signals
    AppSource,
    /// Duplicates its input onto any number of request ports
    Tee,
    Queue,
    AudioConvert,
    AudioResample,
    /// Audio visualizer producing video frames
    Wavescope,
    VideoConvert,
    AudioSink,
    VideoSink,
    /// Hands samples to the application
    AppSink,
}

impl ElementType {
    /// The role an element of this type plays in a graph
    #[must_use]
    pub const fn kind(self) -> NodeKind {
        match self {
            Self::AppSource => NodeKind::Source,
            Self::Tee => NodeKind::Fanout,
            Self::Queue
            | Self::AudioConvert
            | Self::AudioResample
            | Self::Wavescope
            | Self::VideoConvert => NodeKind::Filter,
            Self::AudioSink | Self::VideoSink | Self::AppSink => NodeKind::Sink,
        }
    }

    /// Elements whose output caps are whatever reaches their input
    #[must_use]
    pub const fn is_pass_through(self) -> bool {
        matches!(self, Self::Tee | Self::Queue)
    }

    /// Name used in pipeline descriptions and logs
    #[must_use]
    pub const fn factory_name(self) -> &'static str {
        match self {
            Self::AppSource => "appsrc",
            Self::Tee => "tee",
            Self::Queue => "queue",
            Self::AudioConvert => "audioconvert",
            Self::AudioResample => "audioresample",
            Self::Wavescope => "wavescope",
            Self::VideoConvert => "videoconvert",
            Self::AudioSink => "audiosink",
            Self::VideoSink => "videosink",
            Self::AppSink => "appsink",
        }
    }

    /// Static ports created together with the node
    pub(crate) fn static_ports(self, properties: &NodeProperties) -> SmallVec<[PortTemplate; 2]> {
        let raw_audio = Caps::Audio(None);
        let mut ports = SmallVec::new();
        match self {
            Self::AppSource => {
                ports.push(PortTemplate::output("src", Caps::Audio(properties.caps)));
            }
            Self::Tee => ports.push(PortTemplate::input("sink", Caps::Any)),
            Self::Queue => {
                ports.push(PortTemplate::input("sink", Caps::Any));
                ports.push(PortTemplate::output("src", Caps::Any));
            }
            Self::AudioConvert | Self::AudioResample => {
                ports.push(PortTemplate::input("sink", raw_audio));
                ports.push(PortTemplate::output("src", raw_audio));
            }
            Self::Wavescope => {
                ports.push(PortTemplate::input("sink", raw_audio));
                ports.push(PortTemplate::output("src", Caps::Video));
            }
            Self::VideoConvert => {
                ports.push(PortTemplate::input("sink", Caps::Video));
                ports.push(PortTemplate::output("src", Caps::Video));
            }
            Self::AudioSink => ports.push(PortTemplate::input("sink", raw_audio)),
            Self::VideoSink => ports.push(PortTemplate::input("sink", Caps::Video)),
            Self::AppSink => {
                ports.push(PortTemplate::input("sink", Caps::Audio(properties.caps)));
            }
        }
        ports
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.factory_name())
    }
}

/// Optional per-node settings; unset fields take element defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeProperties {
    /// Fixed stream format (app source and app sink)
    pub caps: Option<StreamFormat>,
    /// App source queue limit in bytes
    pub max_bytes: Option<usize>,
    /// App source refill threshold, percent of `max_bytes`
    pub min_percent: Option<u8>,
    /// Tee request port limit
    pub max_request_ports: Option<usize>,
    /// App sink ring capacity in chunks
    pub max_buffers: Option<usize>,
}

/// Everything needed to instantiate one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    pub element: ElementType,
    #[serde(default)]
    pub properties: NodeProperties,
}

impl NodeSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, element: ElementType) -> Self {
        Self {
            name: name.into(),
            element,
            properties: NodeProperties::default(),
        }
    }

    #[must_use]
    pub fn with_properties(mut self, properties: NodeProperties) -> Self {
        self.properties = properties;
        self
    }

    #[must_use]
    pub fn with_caps(mut self, caps: StreamFormat) -> Self {
        self.properties.caps = Some(caps);
        self
    }
}

/// A node owned by a [`Graph`](crate::Graph)
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) element: Element,
    pub(crate) ports: SmallVec<[PortId; 4]>,
    pub(crate) active: bool,
}

impl Node {
    /// Get the node's ID
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn element_type(&self) -> ElementType {
        self.element.element_type()
    }

    /// Get the node's role in the graph
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.element_type().kind()
    }

    /// All ports, static ones first, request ports in acquisition order
    #[must_use]
    pub fn ports(&self) -> &[PortId] {
        &self.ports
    }

    /// Check if the node is active
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Get the element state behind this node
    #[must_use]
    pub fn element(&self) -> &Element {
        &self.element
    }
}
