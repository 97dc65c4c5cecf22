//! Connection points on graph nodes.

use branchflow_core::{Caps, NodeId};

/// Identifier of a port inside one graph. Never reused within that graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub(crate) usize);

impl std::fmt::Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
}

/// How a port comes into existence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortPresence {
    /// Created with the node, lives as long as the node
    Static,
    /// Created on demand from a fan-out node and explicitly released
    Request,
}

/// Declared shape of a port, before it is instantiated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortTemplate {
    pub name: &'static str,
    pub direction: PortDirection,
    pub presence: PortPresence,
    pub caps: Caps,
}

impl PortTemplate {
    pub(crate) const fn input(name: &'static str, caps: Caps) -> Self {
        Self {
            name,
            direction: PortDirection::Input,
            presence: PortPresence::Static,
            caps,
        }
    }

    pub(crate) const fn output(name: &'static str, caps: Caps) -> Self {
        Self {
            name,
            direction: PortDirection::Output,
            presence: PortPresence::Static,
            caps,
        }
    }
}

/// A port instance. Participates in at most one link at a time.
#[derive(Debug, Clone)]
pub struct Port {
    pub(crate) id: PortId,
    pub(crate) node: NodeId,
    pub(crate) name: String,
    pub(crate) direction: PortDirection,
    pub(crate) presence: PortPresence,
    pub(crate) caps: Caps,
    pub(crate) peer: Option<PortId>,
}

impl Port {
    /// Get the port's ID
    #[must_use]
    pub fn id(&self) -> PortId {
        self.id
    }

    /// The node owning this port
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the port's direction
    #[must_use]
    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    /// Whether the port is static or was requested from a fan-out node
    #[must_use]
    pub fn presence(&self) -> PortPresence {
        self.presence
    }

    /// Caps template this port was created with
    #[must_use]
    pub fn caps(&self) -> Caps {
        self.caps
    }

    /// The port on the other end of this port's link
    #[must_use]
    pub fn peer(&self) -> Option<PortId> {
        self.peer
    }

    /// Check if the port has a peer
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.peer.is_some()
    }
}

/// A directed link from an output port to an input port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Link {
    pub src: PortId,
    pub sink: PortId,
}
