//! Dynamic fan-out: request ports on a tee, one per consumer branch.

use branchflow_core::NodeId;

use crate::error::FanoutError;
use crate::graph::Graph;
use crate::port::{Link, PortId};

/// One attached branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutLink {
    /// Position of the branch in the `attach` call
    pub index: usize,
    /// Port acquired from the fan-out node
    pub request_port: PortId,
    /// Input port of the branch's first node
    pub entry: PortId,
}

impl FanoutLink {
    /// The link this branch added to the graph
    #[must_use]
    pub const fn link(&self) -> Link {
        Link {
            src: self.request_port,
            sink: self.entry,
        }
    }
}

/// Tracks request ports acquired from fan-out nodes so they can be released
/// in reverse acquisition order.
#[derive(Debug, Default)]
pub struct FanoutManager {
    links: Vec<FanoutLink>,
}

impl FanoutManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Give every branch its own copy of the fan-out node's input.
    ///
    /// Branches are attached in order. If any branch fails, the request ports
    /// acquired by this call are released before the error is returned, and
    /// links from earlier calls are left untouched.
    pub fn attach(
        &mut self,
        graph: &mut Graph,
        fanout: NodeId,
        branches: &[PortId],
    ) -> Result<&[FanoutLink], FanoutError> {
        let first = self.links.len();

        for (index, &entry) in branches.iter().enumerate() {
            let request_port = match graph.request_port(fanout) {
                Ok(port) => port,
                Err(source) => {
                    self.unwind(graph, first);
                    return Err(FanoutError::FanoutRequestFailed { index, source });
                }
            };

            if let Err(source) = graph.link(request_port, entry) {
                // Not linked yet, so not in `links`
                if let Err(e) = graph.release_port(request_port) {
                    tracing::warn!("Failed to release {}: {}", request_port, e);
                }
                self.unwind(graph, first);
                return Err(FanoutError::FanoutLinkFailed { index, source });
            }

            self.links.push(FanoutLink {
                index,
                request_port,
                entry,
            });
        }

        tracing::info!("Attached {} fan-out branches", branches.len());
        Ok(&self.links[first..])
    }

    fn unwind(&mut self, graph: &mut Graph, first: usize) {
        let acquired = self.links.split_off(first);
        tracing::debug!("Unwinding {} fan-out branches", acquired.len());
        Self::release(graph, &acquired);
    }

    /// Release every request port this manager holds, newest first.
    ///
    /// Returns the released ports in release order. Calling it again, or
    /// after the graph already dropped them, releases nothing. Ports the
    /// graph refuses to release (their node is still active) stay tracked.
    pub fn detach(&mut self, graph: &mut Graph) -> Vec<PortId> {
        let links = std::mem::take(&mut self.links);
        let released = Self::release(graph, &links);
        self.links = links
            .into_iter()
            .filter(|link| graph.port(link.request_port).is_some())
            .collect();
        if !released.is_empty() {
            tracing::info!("Detached {} fan-out branches", released.len());
        }
        released
    }

    /// Release the request ports of `links` in reverse order, returning the
    /// ones actually released
    pub fn release(graph: &mut Graph, links: &[FanoutLink]) -> Vec<PortId> {
        links
            .iter()
            .rev()
            .map(|link| link.request_port)
            .filter(|&port| match graph.release_port(port) {
                Ok(released) => released,
                Err(e) => {
                    tracing::warn!("Failed to release {}: {}", port, e);
                    false
                }
            })
            .collect()
    }

    /// Branches currently attached, in acquisition order
    #[must_use]
    pub fn links(&self) -> &[FanoutLink] {
        &self.links
    }
}
