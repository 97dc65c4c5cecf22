//! Media processing graph.
//!
//! This crate provides the node/port/link model, the element catalogue, the
//! all-or-nothing [`GraphBuilder`], the [`FanoutManager`] for request-port
//! branches, and the RON pipeline description format.

pub mod builder;
pub mod description;
pub mod elements;
pub mod error;
pub mod fanout;
pub mod graph;
pub mod node;
pub mod port;

pub use builder::GraphBuilder;
pub use description::{DescriptionError, FanoutSpec, LinkSpec, PipelineDescription, PortRef};
pub use elements::{AppSink, AppSource, Element};
pub use error::{BuildError, FanoutError, GraphError, LinkRefusal};
pub use fanout::{FanoutLink, FanoutManager};
pub use graph::Graph;
pub use node::{ElementType, Node, NodeKind, NodeProperties, NodeSpec};
pub use port::{Link, Port, PortDirection, PortId, PortPresence};
