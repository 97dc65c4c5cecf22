//! Pipeline description file format.
//!
//! Uses RON for a human-readable description of the nodes to create, the
//! static links between them, and the fan-out to attach once they exist.

use serde::{Deserialize, Serialize};
use std::path::Path;

use branchflow_core::{NodeId, StreamFormat};

use crate::error::FanoutError;
use crate::graph::Graph;
use crate::node::{ElementType, NodeSpec};
use crate::port::PortId;

/// Current description format version
pub const DESCRIPTION_VERSION: u32 = 1;

/// A static link between two nodes, by name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkSpec {
    pub from: String,
    pub to: String,
}

impl LinkSpec {
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// A port addressed as `node.port`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub node: String,
    pub port: String,
}

impl PortRef {
    #[must_use]
    pub fn new(node: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            port: port.into(),
        }
    }

    /// Find the static port this reference names
    #[must_use]
    pub fn resolve(&self, graph: &Graph) -> Option<PortId> {
        graph.static_port(graph.node_by_name(&self.node)?, &self.port)
    }
}

/// Fan-out node and the branch entry ports it feeds, in attach order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutSpec {
    pub node: String,
    pub branches: Vec<PortRef>,
}

impl FanoutSpec {
    /// Look up the fan-out node and every branch entry port
    pub fn resolve(&self, graph: &Graph) -> Result<(NodeId, Vec<PortId>), FanoutError> {
        let node = graph
            .node_by_name(&self.node)
            .ok_or_else(|| FanoutError::UnknownBranch(self.node.clone()))?;

        let branches = self
            .branches
            .iter()
            .map(|branch| {
                branch
                    .resolve(graph)
                    .ok_or_else(|| FanoutError::UnknownBranch(format!("{}.{}", branch.node, branch.port)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok((node, branches))
    }
}

/// Top-level pipeline description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDescription {
    /// Format version for future compatibility
    pub version: u32,

    /// Human-readable pipeline name
    pub name: String,

    /// Session stream format, fixed before any data flows
    pub format: StreamFormat,

    /// Nodes, created in this order
    pub nodes: Vec<NodeSpec>,

    /// Static links, attempted in this order
    #[serde(default)]
    pub links: Vec<LinkSpec>,

    #[serde(default)]
    pub fanout: Option<FanoutSpec>,
}

impl PipelineDescription {
    /// Create an empty description
    #[must_use]
    pub fn new(name: impl Into<String>, format: StreamFormat) -> Self {
        Self {
            version: DESCRIPTION_VERSION,
            name: name.into(),
            format,
            nodes: Vec::new(),
            links: Vec::new(),
            fanout: None,
        }
    }

    /// Source, tee and three branches: audio playback, visualization, and
    /// an app sink handing samples back to the application
    #[must_use]
    pub fn three_branch(format: StreamFormat) -> Self {
        let mut description = Self::new("three-branch", format);

        let mut node = |name: &str, element| description.nodes.push(NodeSpec::new(name, element));
        node("app_source", ElementType::AppSource);
        node("tee", ElementType::Tee);
        node("audio_queue", ElementType::Queue);
        node("audio_convert", ElementType::AudioConvert);
        node("audio_resample", ElementType::AudioResample);
        node("audio_sink", ElementType::AudioSink);
        node("video_queue", ElementType::Queue);
        node("visual_convert", ElementType::AudioConvert);
        node("wavescope", ElementType::Wavescope);
        node("video_convert", ElementType::VideoConvert);
        node("video_sink", ElementType::VideoSink);
        node("app_queue", ElementType::Queue);
        description
            .nodes
            .push(NodeSpec::new("app_sink", ElementType::AppSink).with_caps(format));

        description.links = [
            ("app_source", "tee"),
            ("audio_queue", "audio_convert"),
            ("audio_convert", "audio_resample"),
            ("audio_resample", "audio_sink"),
            ("video_queue", "visual_convert"),
            ("visual_convert", "wavescope"),
            ("wavescope", "video_convert"),
            ("video_convert", "video_sink"),
            ("app_queue", "app_sink"),
        ]
        .into_iter()
        .map(|(from, to)| LinkSpec::new(from, to))
        .collect();

        description.fanout = Some(FanoutSpec {
            node: "tee".into(),
            branches: ["audio_queue", "video_queue", "app_queue"]
                .into_iter()
                .map(|queue| PortRef::new(queue, "sink"))
                .collect(),
        });

        description
    }

    /// Save description to a RON file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be written or serialization fails
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), DescriptionError> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| DescriptionError::SerializationFailed(e.to_string()))?;

        std::fs::write(path.as_ref(), ron_string).map_err(|e| DescriptionError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Load description from a RON file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, deserialization fails, or the
    /// version is newer than this build understands
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DescriptionError> {
        let ron_string =
            std::fs::read_to_string(path.as_ref()).map_err(|e| DescriptionError::IoError(e.to_string()))?;

        Self::parse(&ron_string)
    }

    /// Parse a description from RON text
    pub fn parse(text: &str) -> Result<Self, DescriptionError> {
        let description: Self =
            ron::from_str(text).map_err(|e| DescriptionError::DeserializationFailed(e.to_string()))?;

        if description.version > DESCRIPTION_VERSION {
            return Err(DescriptionError::UnsupportedVersion(description.version));
        }

        Ok(description)
    }
}

/// Errors that can occur while saving or loading a description
#[derive(Debug, thiserror::Error)]
pub enum DescriptionError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Unsupported description version: {0}")]
    UnsupportedVersion(u32),
}
