//! All-or-nothing graph construction.

use crate::description::{LinkSpec, PipelineDescription};
use crate::error::BuildError;
use crate::graph::Graph;
use crate::node::{ElementType, NodeSpec};

/// Collects node specs and static links, then builds them as one step.
///
/// `build` either returns a fully linked graph or an error; on failure every
/// node created so far is released before returning.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    nodes: Vec<NodeSpec>,
    links: Vec<LinkSpec>,
}

impl GraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder for the nodes and static links of a description.
    ///
    /// App sources without explicit caps take the description's format.
    #[must_use]
    pub fn from_description(description: &PipelineDescription) -> Self {
        let nodes = description
            .nodes
            .iter()
            .cloned()
            .map(|mut spec| {
                if spec.element == ElementType::AppSource && spec.properties.caps.is_none() {
                    spec.properties.caps = Some(description.format);
                }
                spec
            })
            .collect();

        Self {
            nodes,
            links: description.links.clone(),
        }
    }

    #[must_use]
    pub fn node(mut self, spec: NodeSpec) -> Self {
        self.nodes.push(spec);
        self
    }

    #[must_use]
    pub fn link(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.links.push(LinkSpec::new(from, to));
        self
    }

    /// Create every node, then attempt every link in declared order
    ///
    /// # Errors
    ///
    /// `NodeCreationFailed` for the first node that cannot be instantiated,
    /// `UnknownNode` / `LinkFailed` for the first link that cannot be made
    pub fn build(&self) -> Result<Graph, BuildError> {
        let mut graph = Graph::new();

        for spec in &self.nodes {
            if let Err(e) = graph.add_node(spec) {
                let reason = match e {
                    crate::GraphError::ElementCreation { reason, .. } => reason,
                    other => other.to_string(),
                };
                tracing::error!("Failed to create node '{}': {}", spec.name, reason);
                graph.clear();
                return Err(BuildError::NodeCreationFailed {
                    kind: spec.element.kind(),
                    name: spec.name.clone(),
                    reason,
                });
            }
        }

        for link in &self.links {
            let (Some(from), Some(to)) = (graph.node_by_name(&link.from), graph.node_by_name(&link.to)) else {
                let missing = if graph.node_by_name(&link.from).is_none() {
                    link.from.clone()
                } else {
                    link.to.clone()
                };
                graph.clear();
                return Err(BuildError::UnknownNode(missing));
            };

            if let Err(source) = graph.link_nodes(from, to) {
                tracing::error!("Failed to link '{}' to '{}': {}", link.from, link.to, source);
                graph.clear();
                return Err(BuildError::LinkFailed {
                    from: link.from.clone(),
                    to: link.to.clone(),
                    source,
                });
            }
        }

        tracing::info!(
            "Built graph with {} nodes and {} static links",
            graph.node_count(),
            self.links.len()
        );
        Ok(graph)
    }
}
