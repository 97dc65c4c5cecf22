//! Error types for graph construction, linking and fan-out.

use branchflow_core::NodeId;

use crate::node::{ElementType, NodeKind};
use crate::port::PortId;

/// Why a link between two ports was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LinkRefusal {
    #[error("ports must go from an output to an input")]
    WrongDirection,

    #[error("ports belong to the same node")]
    SameNode,

    #[error("port is already linked")]
    AlreadyLinked,

    #[error("caps do not intersect")]
    IncompatibleCaps,
}

/// Errors raised by [`Graph`](crate::Graph) operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("Node {0} not found")]
    UnknownNode(NodeId),

    #[error("Port {0} not found")]
    UnknownPort(PortId),

    #[error("Node name '{0}' already in use")]
    DuplicateName(String),

    #[error("Failed to create {element} '{name}': {reason}")]
    ElementCreation {
        name: String,
        element: ElementType,
        reason: String,
    },

    #[error("Node '{0}' does not support request ports")]
    NotFanout(String),

    #[error("Node '{name}' refused a request port (limit {limit})")]
    RequestRefused { name: String, limit: usize },

    #[error("Port '{0}' is not a request port")]
    NotRequestPort(String),

    #[error("Port '{0}' cannot be released while its node is active")]
    ReleaseWhileActive(String),

    #[error("Cannot link {src} to {sink}: {reason}")]
    LinkRefused {
        src: String,
        sink: String,
        reason: LinkRefusal,
    },

    #[error("No compatible ports to link '{from}' to '{to}'")]
    NoCompatiblePorts { from: String, to: String },

    #[error("Caps negotiation failed between {upstream} and {downstream}")]
    NegotiationFailed { upstream: String, downstream: String },

    #[error("Node '{0}' is not an app source")]
    NotSource(String),
}

/// Errors from [`GraphBuilder::build`](crate::GraphBuilder::build).
///
/// A failed build never hands back a partial graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("Failed to create {kind} node '{name}': {reason}")]
    NodeCreationFailed {
        kind: NodeKind,
        name: String,
        reason: String,
    },

    #[error("Failed to link '{from}' to '{to}'")]
    LinkFailed {
        from: String,
        to: String,
        #[source]
        source: GraphError,
    },

    #[error("Link references unknown node '{0}'")]
    UnknownNode(String),
}

/// Errors from [`FanoutManager::attach`](crate::FanoutManager::attach).
///
/// Every request port acquired by the failing call is released before the
/// error is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FanoutError {
    #[error("Fan-out refused a request port for branch {index}")]
    FanoutRequestFailed {
        index: usize,
        #[source]
        source: GraphError,
    },

    #[error("Failed to link fan-out branch {index}")]
    FanoutLinkFailed {
        index: usize,
        #[source]
        source: GraphError,
    },

    #[error("Fan-out branch '{0}' does not name a port in the graph")]
    UnknownBranch(String),
}

impl FanoutError {
    /// Index of the branch that failed, if the failure was tied to one
    #[must_use]
    pub const fn index(&self) -> Option<usize> {
        match self {
            Self::FanoutRequestFailed { index, .. } | Self::FanoutLinkFailed { index, .. } => Some(*index),
            Self::UnknownBranch(_) => None,
        }
    }
}
