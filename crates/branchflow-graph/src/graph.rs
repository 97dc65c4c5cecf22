//! The media processing graph.
//!
//! A [`Graph`] owns its nodes and their ports exclusively. Links live on the
//! ports themselves (each port stores its peer), so a port can never take part
//! in more than one link.
//!
//! Data moves only while nodes are active: the app source queues pushed
//! chunks, and [`Graph::advance`] releases the ones whose timestamp is due and
//! delivers them downstream, depth first, on the calling thread.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use branchflow_comms::{Bus, BusMessage, BusReceiver, ElementSignal, ElementState};
use branchflow_core::{Caps, ClockTime, FlowReturn, NodeId, SampleChunk, StreamFormat};
use smallvec::SmallVec;

use crate::elements::{AppSink, AppSource, Element, create_element};
use crate::error::{GraphError, LinkRefusal};
use crate::node::{ElementType, Node, NodeKind, NodeSpec};
use crate::port::{Link, Port, PortDirection, PortId, PortPresence};

pub struct Graph {
    nodes: HashMap<NodeId, Node>,
    ports: HashMap<PortId, Port>,
    names: HashMap<String, NodeId>,
    next_node: usize,
    next_port: usize,
    bus: Bus,
    eos_posted: bool,
}

impl Graph {
    /// Create an empty graph with its own bus
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            ports: HashMap::new(),
            names: HashMap::new(),
            next_node: 0,
            next_port: 0,
            bus: Bus::new(),
            eos_posted: false,
        }
    }

    /// Instantiate a node and its static ports
    pub fn add_node(&mut self, spec: &NodeSpec) -> Result<NodeId, GraphError> {
        if self.names.contains_key(&spec.name) {
            return Err(GraphError::DuplicateName(spec.name.clone()));
        }

        let element = create_element(spec.element, &spec.properties).map_err(|reason| {
            GraphError::ElementCreation {
                name: spec.name.clone(),
                element: spec.element,
                reason,
            }
        })?;

        let id = NodeId(self.next_node);
        self.next_node += 1;

        let mut ports = SmallVec::new();
        for template in spec.element.static_ports(&spec.properties) {
            let port_id = self.allocate_port(id, template.name.to_string(), template.direction, template.presence, template.caps);
            ports.push(port_id);
        }

        self.nodes.insert(
            id,
            Node {
                id,
                name: spec.name.clone(),
                element,
                ports,
                active: false,
            },
        );
        self.names.insert(spec.name.clone(), id);

        tracing::debug!("Added {} node '{}' ({})", spec.element, spec.name, id);
        Ok(id)
    }

    fn allocate_port(
        &mut self,
        node: NodeId,
        name: String,
        direction: PortDirection,
        presence: PortPresence,
        caps: Caps,
    ) -> PortId {
        let id = PortId(self.next_port);
        self.next_port += 1;
        self.ports.insert(
            id,
            Port {
                id,
                node,
                name,
                direction,
                presence,
                caps,
                peer: None,
            },
        );
        id
    }

    /// Unlink and drop every port and node
    pub fn clear(&mut self) {
        let nodes = self.nodes.len();
        let ports = self.ports.len();
        self.ports.clear();
        self.nodes.clear();
        self.names.clear();
        self.eos_posted = false;
        tracing::debug!("Released {} nodes and {} ports", nodes, ports);
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    #[must_use]
    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    /// All nodes, in creation order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        let mut nodes: Vec<&Node> = self.nodes.values().collect();
        nodes.sort_unstable_by_key(|node| node.id);
        nodes.into_iter()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes of the given kind, in creation order
    #[must_use]
    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        self.nodes()
            .filter(|node| node.kind() == kind)
            .map(Node::id)
            .collect()
    }

    #[must_use]
    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    #[must_use]
    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    /// Look up a static port by name
    #[must_use]
    pub fn static_port(&self, node: NodeId, name: &str) -> Option<PortId> {
        self.nodes.get(&node)?.ports.iter().copied().find(|id| {
            self.ports
                .get(id)
                .is_some_and(|port| port.presence == PortPresence::Static && port.name == name)
        })
    }

    /// Request ports currently held on `node`, in acquisition order
    #[must_use]
    pub fn request_ports(&self, node: NodeId) -> Vec<PortId> {
        self.nodes
            .get(&node)
            .map(|node| {
                node.ports
                    .iter()
                    .copied()
                    .filter(|id| {
                        self.ports
                            .get(id)
                            .is_some_and(|port| port.presence == PortPresence::Request)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every current link, ordered by output port
    #[must_use]
    pub fn links(&self) -> Vec<Link> {
        let mut links: Vec<Link> = self
            .ports
            .values()
            .filter(|port| port.direction == PortDirection::Output)
            .filter_map(|port| {
                port.peer.map(|sink| Link {
                    src: port.id,
                    sink,
                })
            })
            .collect();
        links.sort_unstable_by_key(|link| link.src);
        links
    }

    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links().len()
    }

    /// `node.port` name used in logs and errors
    #[must_use]
    pub fn port_path(&self, id: PortId) -> String {
        self.ports.get(&id).map_or_else(
            || id.to_string(),
            |port| {
                let node = self.nodes.get(&port.node).map_or("?", |node| node.name.as_str());
                format!("{node}.{}", port.name)
            },
        )
    }

    fn node_name(&self, id: NodeId) -> String {
        self.nodes
            .get(&id)
            .map_or_else(|| id.to_string(), |node| node.name.clone())
    }

    /// Link the first free, compatible static output of `from` to the first
    /// free, compatible static input of `to`
    pub fn link_nodes(&mut self, from: NodeId, to: NodeId) -> Result<Link, GraphError> {
        let src_node = self.nodes.get(&from).ok_or(GraphError::UnknownNode(from))?;
        let sink_node = self.nodes.get(&to).ok_or(GraphError::UnknownNode(to))?;

        let outputs = self.free_static_ports(src_node, PortDirection::Output);
        let inputs = self.free_static_ports(sink_node, PortDirection::Input);

        for &src in &outputs {
            for &sink in &inputs {
                if matches!(self.check_link(src, sink), Ok(Ok(()))) {
                    return self.link(src, sink);
                }
            }
        }

        Err(GraphError::NoCompatiblePorts {
            from: self.node_name(from),
            to: self.node_name(to),
        })
    }

    fn free_static_ports(&self, node: &Node, direction: PortDirection) -> SmallVec<[PortId; 4]> {
        node.ports
            .iter()
            .copied()
            .filter(|id| {
                self.ports.get(id).is_some_and(|port| {
                    port.direction == direction
                        && port.presence == PortPresence::Static
                        && port.peer.is_none()
                })
            })
            .collect()
    }

    /// Link an output port to an input port
    pub fn link(&mut self, src: PortId, sink: PortId) -> Result<Link, GraphError> {
        if let Err(reason) = self.check_link(src, sink)? {
            return Err(GraphError::LinkRefused {
                src: self.port_path(src),
                sink: self.port_path(sink),
                reason,
            });
        }

        if let Some(port) = self.ports.get_mut(&src) {
            port.peer = Some(sink);
        }
        if let Some(port) = self.ports.get_mut(&sink) {
            port.peer = Some(src);
        }

        tracing::debug!("Linked {} -> {}", self.port_path(src), self.port_path(sink));
        Ok(Link { src, sink })
    }

    /// Validate a prospective link. The outer error is for unknown ports.
    fn check_link(&self, src: PortId, sink: PortId) -> Result<Result<(), LinkRefusal>, GraphError> {
        let src_port = self.ports.get(&src).ok_or(GraphError::UnknownPort(src))?;
        let sink_port = self.ports.get(&sink).ok_or(GraphError::UnknownPort(sink))?;

        if src_port.direction != PortDirection::Output || sink_port.direction != PortDirection::Input {
            return Ok(Err(LinkRefusal::WrongDirection));
        }
        if src_port.node == sink_port.node {
            return Ok(Err(LinkRefusal::SameNode));
        }
        if src_port.is_linked() || sink_port.is_linked() {
            return Ok(Err(LinkRefusal::AlreadyLinked));
        }

        let upstream = self.resolve_caps(src, &mut HashSet::new());
        let downstream = self.resolve_caps(sink, &mut HashSet::new());
        match (upstream, downstream) {
            (Some(a), Some(b)) if a.can_intersect(&b) => Ok(Ok(())),
            _ => Ok(Err(LinkRefusal::IncompatibleCaps)),
        }
    }

    /// Remove a link. Returns false if it did not exist.
    pub fn unlink(&mut self, link: Link) -> bool {
        let linked = self.ports.get(&link.src).and_then(|port| port.peer) == Some(link.sink);
        if !linked {
            return false;
        }
        if let Some(port) = self.ports.get_mut(&link.src) {
            port.peer = None;
        }
        if let Some(port) = self.ports.get_mut(&link.sink) {
            port.peer = None;
        }
        tracing::debug!("Unlinked {} -> {}", self.port_path(link.src), self.port_path(link.sink));
        true
    }

    /// Create a new output port on a fan-out node
    pub fn request_port(&mut self, node: NodeId) -> Result<PortId, GraphError> {
        let held = self.request_ports(node).len();
        let entry = self.nodes.get_mut(&node).ok_or(GraphError::UnknownNode(node))?;
        let Element::Tee(tee) = &mut entry.element else {
            return Err(GraphError::NotFanout(entry.name.clone()));
        };
        if let Some(limit) = tee.max_request_ports()
            && held >= limit
        {
            return Err(GraphError::RequestRefused {
                name: entry.name.clone(),
                limit,
            });
        }

        let name = tee.next_port_name();
        let port = self.allocate_port(node, name, PortDirection::Output, PortPresence::Request, Caps::Any);
        if let Some(entry) = self.nodes.get_mut(&node) {
            entry.ports.push(port);
        }

        tracing::debug!("Obtained request port {}", self.port_path(port));
        Ok(port)
    }

    /// Unlink and remove a request port. The owning node must be inactive.
    ///
    /// Returns `Ok(false)` when the port no longer exists, so releasing twice
    /// is harmless.
    pub fn release_port(&mut self, port: PortId) -> Result<bool, GraphError> {
        let Some(entry) = self.ports.get(&port) else {
            return Ok(false);
        };
        let (presence, peer, owner) = (entry.presence, entry.peer, entry.node);
        if presence != PortPresence::Request {
            return Err(GraphError::NotRequestPort(self.port_path(port)));
        }
        if self.nodes.get(&owner).is_some_and(|node| node.active) {
            return Err(GraphError::ReleaseWhileActive(self.port_path(port)));
        }

        if let Some(peer) = peer {
            self.unlink(Link { src: port, sink: peer });
        }
        let path = self.port_path(port);
        if let Some(removed) = self.ports.remove(&port)
            && let Some(node) = self.nodes.get_mut(&removed.node)
        {
            node.ports.retain(|id| *id != port);
        }

        tracing::debug!("Released request port {}", path);
        Ok(true)
    }

    /// Caps a port can carry given what it is linked to.
    ///
    /// Pass-through elements take on the caps of the ports on their other
    /// side. `None` means the reachable constraints contradict each other.
    fn resolve_caps(&self, port: PortId, visited: &mut HashSet<NodeId>) -> Option<Caps> {
        let entry = self.ports.get(&port)?;
        let mut caps = entry.caps;

        let node = self.nodes.get(&entry.node)?;
        if !node.element_type().is_pass_through() || !visited.insert(node.id) {
            return Some(caps);
        }

        for other in &node.ports {
            let Some(other_port) = self.ports.get(other) else {
                continue;
            };
            if other_port.direction == entry.direction {
                continue;
            }
            if let Some(peer) = other_port.peer {
                let peer_caps = self.resolve_caps(peer, visited)?;
                caps = caps.intersect(&peer_caps)?;
            }
        }
        Some(caps)
    }

    /// Check every link end to end before data flows
    pub fn negotiate(&self) -> Result<(), GraphError> {
        for link in self.links() {
            let upstream = self.resolve_caps(link.src, &mut HashSet::new());
            let downstream = self.resolve_caps(link.sink, &mut HashSet::new());
            let agreed = match (upstream, downstream) {
                (Some(a), Some(b)) => a.intersect(&b),
                _ => None,
            };
            if agreed.is_none() {
                return Err(GraphError::NegotiationFailed {
                    upstream: self.port_path(link.src),
                    downstream: self.port_path(link.sink),
                });
            }
            tracing::debug!(
                "Negotiated {} -> {}",
                self.port_path(link.src),
                self.port_path(link.sink)
            );
        }
        Ok(())
    }

    /// Node-level topological order (Kahn's algorithm, lowest id first).
    ///
    /// Returns `Err(remaining_nodes)` if the links form a cycle.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, Vec<NodeId>> {
        let mut in_degree: HashMap<NodeId, usize> = HashMap::with_capacity(self.nodes.len());
        for &id in self.nodes.keys() {
            in_degree.insert(id, 0);
        }

        let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::with_capacity(self.nodes.len());
        for link in self.links() {
            let (Some(from), Some(to)) = (self.ports.get(&link.src), self.ports.get(&link.sink)) else {
                continue;
            };
            *in_degree.entry(to.node).or_insert(0) += 1;
            adjacency.entry(from.node).or_default().push(to.node);
        }

        let mut queue: BinaryHeap<Reverse<NodeId>> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&id, _)| Reverse(id))
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(node)) = queue.pop() {
            result.push(node);
            if let Some(outgoing) = adjacency.get(&node) {
                for &to in outgoing {
                    if let Some(degree) = in_degree.get_mut(&to) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push(Reverse(to));
                        }
                    }
                }
            }
        }

        if result.len() == self.nodes.len() {
            Ok(result)
        } else {
            let processed: HashSet<NodeId> = result.into_iter().collect();
            let mut remaining: Vec<NodeId> = self
                .nodes
                .keys()
                .filter(|id| !processed.contains(id))
                .copied()
                .collect();
            remaining.sort_unstable();
            Err(remaining)
        }
    }

    fn processing_order(&self) -> Vec<NodeId> {
        self.topological_order().unwrap_or_else(|cycle| {
            tracing::warn!("Graph contains cycle involving nodes: {:?}. Using id order instead.", cycle);
            let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
            ids.sort_unstable();
            ids
        })
    }

    /// Activate every node, sinks first. Sources then ask for data.
    pub fn activate(&mut self) {
        self.bus.set_flushing(false);
        self.eos_posted = false;

        let order = self.processing_order();
        for id in order.into_iter().rev() {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            if node.active {
                continue;
            }
            node.active = true;
            let signal = match &mut node.element {
                Element::AppSource(src) => Some(src.activate()),
                Element::Render(sink) => {
                    sink.set_eos(false);
                    None
                }
                Element::AppSink(sink) => {
                    sink.set_eos(false);
                    None
                }
                Element::Tee(_) | Element::PassThrough(_) => None,
            };
            self.bus.post(BusMessage::StateChanged {
                source: node.name.clone(),
                old: ElementState::Inactive,
                new: ElementState::Active,
            });
            if let Some(signal) = signal {
                self.bus.emit(id, signal);
            }
        }
        tracing::info!("Activated {} nodes", self.nodes.len());
    }

    /// Deactivate every node, sources first, dropping queued data
    pub fn deactivate(&mut self) {
        for id in self.processing_order() {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            if !node.active {
                continue;
            }
            node.active = false;
            if let Element::AppSource(src) = &mut node.element {
                src.deactivate();
            }
            self.bus.post(BusMessage::StateChanged {
                source: node.name.clone(),
                old: ElementState::Active,
                new: ElementState::Inactive,
            });
        }
        tracing::info!("Deactivated {} nodes", self.nodes.len());
    }

    /// Whether any node is active
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.nodes.values().any(|node| node.active)
    }

    #[must_use]
    pub fn app_source(&self, node: NodeId) -> Option<&AppSource> {
        match &self.nodes.get(&node)?.element {
            Element::AppSource(src) => Some(src),
            _ => None,
        }
    }

    #[must_use]
    pub fn app_sink(&self, node: NodeId) -> Option<&AppSink> {
        match &self.nodes.get(&node)?.element {
            Element::AppSink(sink) => Some(sink),
            _ => None,
        }
    }

    /// Chunks rendered by an audio or video sink
    #[must_use]
    pub fn rendered(&self, node: NodeId) -> Option<u64> {
        match &self.nodes.get(&node)?.element {
            Element::Render(sink) => Some(sink.rendered()),
            _ => None,
        }
    }

    /// Session format fixed on an app source
    #[must_use]
    pub fn source_format(&self, node: NodeId) -> Option<StreamFormat> {
        self.app_source(node).map(AppSource::format)
    }

    /// Push a chunk into an app source
    pub fn push(&mut self, node: NodeId, chunk: SampleChunk) -> FlowReturn {
        let Some(entry) = self.nodes.get_mut(&node) else {
            return FlowReturn::Error;
        };
        let active = entry.active;
        let Element::AppSource(src) = &mut entry.element else {
            tracing::warn!("Push into '{}', which is not an app source", entry.name);
            return FlowReturn::Error;
        };

        let (flow, signal) = src.push(chunk, active);
        if let Some(signal) = signal {
            self.bus.emit(node, signal);
        }
        flow
    }

    /// Mark an app source as finished; EOS travels downstream once it drains
    pub fn end_of_stream(&mut self, node: NodeId) -> Result<(), GraphError> {
        let entry = self.nodes.get_mut(&node).ok_or(GraphError::UnknownNode(node))?;
        let Element::AppSource(src) = &mut entry.element else {
            return Err(GraphError::NotSource(entry.name.clone()));
        };
        src.end_of_stream();
        tracing::info!("End of stream requested on '{}'", entry.name);
        Ok(())
    }

    /// Release every queued chunk due at `running_time` and deliver it
    /// downstream. Emits refill signals and propagates end-of-stream.
    pub fn advance(&mut self, running_time: ClockTime) {
        for node in self.nodes_of_kind(NodeKind::Source) {
            let Some(src_port) = self.static_port(node, "src") else {
                continue;
            };
            if !self.nodes.get(&node).is_some_and(|entry| entry.active) {
                continue;
            }

            while let Some(chunk) = self.app_source_mut(node).and_then(|src| src.pop_due(running_time)) {
                let flow = match self.ports.get(&src_port).and_then(|port| port.peer) {
                    Some(peer) => self.deliver(peer, &chunk),
                    None => FlowReturn::NotLinked,
                };
                if flow.is_ok() {
                    continue;
                }

                if let Some(src) = self.app_source_mut(node) {
                    src.set_flow(flow);
                }
                if flow.is_fatal() {
                    let name = self.node_name(node);
                    tracing::error!("Streaming stopped on '{}': {}", name, flow);
                    self.bus.post(BusMessage::Error {
                        source: name,
                        diagnostic: format!("Internal data stream error: streaming stopped, reason {flow}"),
                    });
                } else {
                    tracing::debug!("Streaming paused on '{}': {}", self.node_name(node), flow);
                }
                break;
            }

            let (signal, eos) = match self.app_source_mut(node) {
                Some(src) => (src.refill_signal(), src.take_pending_eos()),
                None => (None, false),
            };
            if let Some(signal) = signal {
                self.bus.emit(node, signal);
            }
            if eos && let Some(peer) = self.ports.get(&src_port).and_then(|port| port.peer) {
                self.deliver_eos(peer);
                self.post_eos_if_complete();
            }
        }
    }

    fn app_source_mut(&mut self, node: NodeId) -> Option<&mut AppSource> {
        match &mut self.nodes.get_mut(&node)?.element {
            Element::AppSource(src) => Some(src),
            _ => None,
        }
    }

    /// Output ports of `node` that are linked, with their peers, in port order
    fn linked_outputs(&self, node: &Node) -> SmallVec<[PortId; 4]> {
        node.ports
            .iter()
            .filter_map(|id| self.ports.get(id))
            .filter(|port| port.direction == PortDirection::Output)
            .filter_map(|port| port.peer)
            .collect()
    }

    /// Hand a chunk to the node owning input port `port`
    fn deliver(&mut self, port: PortId, chunk: &SampleChunk) -> FlowReturn {
        let Some(node_id) = self.ports.get(&port).map(|entry| entry.node) else {
            return FlowReturn::NotLinked;
        };
        let Some(node) = self.nodes.get(&node_id) else {
            return FlowReturn::NotLinked;
        };
        if !node.active {
            return FlowReturn::Flushing;
        }

        match node.element_type() {
            ElementType::Tee => {
                let peers = self.linked_outputs(node);
                if peers.is_empty() {
                    return FlowReturn::NotLinked;
                }
                let mut any_ok = false;
                let mut all_eos = true;
                for peer in peers {
                    match self.deliver(peer, chunk) {
                        FlowReturn::Ok => {
                            any_ok = true;
                            all_eos = false;
                        }
                        FlowReturn::Eos => {}
                        FlowReturn::NotLinked => all_eos = false,
                        flow @ (FlowReturn::Flushing | FlowReturn::Error) => return flow,
                    }
                }
                if all_eos {
                    FlowReturn::Eos
                } else if any_ok {
                    FlowReturn::Ok
                } else {
                    FlowReturn::NotLinked
                }
            }
            ElementType::AppSource => FlowReturn::Error,
            ElementType::AudioSink | ElementType::VideoSink | ElementType::AppSink => {
                let Some(node) = self.nodes.get_mut(&node_id) else {
                    return FlowReturn::NotLinked;
                };
                match &mut node.element {
                    Element::Render(sink) => sink.render(),
                    Element::AppSink(sink) => {
                        let flow = sink.render(chunk);
                        if flow.is_ok() {
                            self.bus.emit(node_id, ElementSignal::NewSample);
                        }
                        flow
                    }
                    _ => FlowReturn::Error,
                }
            }
            _ => match self.linked_outputs(node).first() {
                Some(&peer) => self.deliver(peer, chunk),
                None => FlowReturn::NotLinked,
            },
        }
    }

    /// Propagate end-of-stream from input port `port` to every reachable sink
    fn deliver_eos(&mut self, port: PortId) {
        let Some(node_id) = self.ports.get(&port).map(|entry| entry.node) else {
            return;
        };
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        let forward = match &mut node.element {
            Element::Render(sink) => {
                sink.set_eos(true);
                false
            }
            Element::AppSink(sink) => {
                sink.set_eos(true);
                false
            }
            Element::Tee(_) | Element::PassThrough(_) | Element::AppSource(_) => true,
        };
        if !forward {
            return;
        }

        let peers = self
            .nodes
            .get(&node_id)
            .map(|node| self.linked_outputs(node))
            .unwrap_or_default();
        for peer in peers {
            self.deliver_eos(peer);
        }
    }

    fn post_eos_if_complete(&mut self) {
        if self.eos_posted {
            return;
        }
        let mut sinks = self.nodes.values().filter_map(|node| node.element.is_eos_sink()).peekable();
        if sinks.peek().is_none() {
            return;
        }
        if sinks.all(|eos| eos) {
            self.eos_posted = true;
            tracing::info!("All sinks reached end of stream");
            self.bus.post(BusMessage::Eos);
        }
    }

    /// Take the oldest sample held by an app sink
    pub fn pull_sample(&mut self, node: NodeId) -> Option<SampleChunk> {
        match &mut self.nodes.get_mut(&node)?.element {
            Element::AppSink(sink) => sink.pull(),
            _ => None,
        }
    }

    /// Receiver for this graph's bus
    #[must_use]
    pub fn bus_receiver(&self) -> BusReceiver {
        self.bus.receiver()
    }

    /// Stop delivering bus messages and drop any pending ones
    pub fn flush_bus(&mut self) {
        self.bus.set_flushing(true);
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        if !self.nodes.is_empty() {
            tracing::debug!(
                "Releasing graph with {} nodes and {} ports",
                self.nodes.len(),
                self.ports.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchflow_comms::GraphMessage;
    use branchflow_core::SampleFormat;

    fn format() -> StreamFormat {
        StreamFormat::new(SampleFormat::S16LE, 44100, 1)
    }

    fn add(graph: &mut Graph, name: &str, element: ElementType) -> NodeId {
        let spec = NodeSpec::new(name, element).with_caps(format());
        graph.add_node(&spec).unwrap()
    }

    fn chunk(pts: u64) -> SampleChunk {
        SampleChunk::new(
            ClockTime::from_nseconds(pts),
            ClockTime::from_nseconds(10),
            pts,
            2,
            vec![0; 4],
        )
    }

    /// src -> tee, request ports to two queues feeding an audio sink and an app sink
    fn fanned_graph() -> (Graph, NodeId, NodeId, NodeId, NodeId) {
        let mut graph = Graph::new();
        let src = add(&mut graph, "src", ElementType::AppSource);
        let tee = add(&mut graph, "tee", ElementType::Tee);
        let q1 = add(&mut graph, "q1", ElementType::Queue);
        let audio = add(&mut graph, "audio", ElementType::AudioSink);
        let q2 = add(&mut graph, "q2", ElementType::Queue);
        let app = add(&mut graph, "app", ElementType::AppSink);

        graph.link_nodes(src, tee).unwrap();
        graph.link_nodes(q1, audio).unwrap();
        graph.link_nodes(q2, app).unwrap();

        for queue in [q1, q2] {
            let port = graph.request_port(tee).unwrap();
            let entry = graph.static_port(queue, "sink").unwrap();
            graph.link(port, entry).unwrap();
        }
        (graph, src, tee, audio, app)
    }

    #[test]
    fn test_add_node_creates_static_ports() {
        let mut graph = Graph::new();
        let queue = add(&mut graph, "queue", ElementType::Queue);

        assert_eq!(graph.node(queue).unwrap().ports().len(), 2);
        assert!(graph.static_port(queue, "sink").is_some());
        assert!(graph.static_port(queue, "src").is_some());
        assert!(graph.static_port(queue, "src_0").is_none());
        assert_eq!(graph.node_by_name("queue"), Some(queue));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut graph = Graph::new();
        add(&mut graph, "q", ElementType::Queue);
        let result = graph.add_node(&NodeSpec::new("q", ElementType::Queue));
        assert_eq!(result, Err(GraphError::DuplicateName("q".into())));
    }

    #[test]
    fn test_static_port_links_at_most_once() {
        let mut graph = Graph::new();
        let src = add(&mut graph, "src", ElementType::AppSource);
        let q1 = add(&mut graph, "q1", ElementType::Queue);
        let q2 = add(&mut graph, "q2", ElementType::Queue);

        graph.link_nodes(src, q1).unwrap();
        let result = graph.link_nodes(src, q2);
        assert!(matches!(result, Err(GraphError::NoCompatiblePorts { .. })));

        let src_port = graph.static_port(src, "src").unwrap();
        let q2_sink = graph.static_port(q2, "sink").unwrap();
        let result = graph.link(src_port, q2_sink);
        assert!(matches!(
            result,
            Err(GraphError::LinkRefused {
                reason: LinkRefusal::AlreadyLinked,
                ..
            })
        ));
    }

    #[test]
    fn test_incompatible_caps_refused() {
        let mut graph = Graph::new();
        let scope = add(&mut graph, "scope", ElementType::Wavescope);
        let audio = add(&mut graph, "audio", ElementType::AudioSink);

        // Video out, audio in
        assert_eq!(
            graph.link_nodes(scope, audio),
            Err(GraphError::NoCompatiblePorts {
                from: "scope".into(),
                to: "audio".into(),
            })
        );
        assert_eq!(graph.link_count(), 0);
    }

    #[test]
    fn test_link_nodes_skips_incompatible_outputs() {
        let mut graph = Graph::new();
        let scope = add(&mut graph, "scope", ElementType::Wavescope);
        let audio = add(&mut graph, "audio", ElementType::AudioSink);
        let video = add(&mut graph, "video", ElementType::VideoSink);

        // The refused pair leaves the output free for a compatible peer
        assert!(matches!(
            graph.link_nodes(scope, audio),
            Err(GraphError::NoCompatiblePorts { .. })
        ));
        let link = graph.link_nodes(scope, video).unwrap();
        assert_eq!(link.src, graph.static_port(scope, "src").unwrap());
        assert_eq!(link.sink, graph.static_port(video, "sink").unwrap());
        assert_eq!(graph.link_count(), 1);
    }

    #[test]
    fn test_wrong_direction_refused() {
        let mut graph = Graph::new();
        let q1 = add(&mut graph, "q1", ElementType::Queue);
        let q2 = add(&mut graph, "q2", ElementType::Queue);
        let sink = graph.static_port(q1, "sink").unwrap();
        let src = graph.static_port(q2, "src").unwrap();

        assert!(matches!(
            graph.link(sink, src),
            Err(GraphError::LinkRefused {
                reason: LinkRefusal::WrongDirection,
                ..
            })
        ));
    }

    #[test]
    fn test_request_ports_follow_upstream_caps() {
        let mut graph = Graph::new();
        let src = add(&mut graph, "src", ElementType::AppSource);
        let tee = add(&mut graph, "tee", ElementType::Tee);
        let video = add(&mut graph, "video", ElementType::VideoConvert);
        graph.link_nodes(src, tee).unwrap();

        // Audio reaches the tee, so its request ports cannot feed video
        let port = graph.request_port(tee).unwrap();
        let entry = graph.static_port(video, "sink").unwrap();
        assert!(matches!(
            graph.link(port, entry),
            Err(GraphError::LinkRefused {
                reason: LinkRefusal::IncompatibleCaps,
                ..
            })
        ));
    }

    #[test]
    fn test_request_and_release_port() {
        let mut graph = Graph::new();
        let tee = add(&mut graph, "tee", ElementType::Tee);
        let queue = add(&mut graph, "queue", ElementType::Queue);

        let port = graph.request_port(tee).unwrap();
        assert_eq!(graph.port(port).unwrap().name(), "src_0");
        let entry = graph.static_port(queue, "sink").unwrap();
        graph.link(port, entry).unwrap();

        assert_eq!(graph.release_port(port), Ok(true));
        assert!(graph.port(port).is_none());
        assert!(!graph.port(entry).unwrap().is_linked());
        assert!(graph.request_ports(tee).is_empty());

        // Idempotent
        assert_eq!(graph.release_port(port), Ok(false));

        // Names keep counting
        let next = graph.request_port(tee).unwrap();
        assert_eq!(graph.port(next).unwrap().name(), "src_1");
    }

    #[test]
    fn test_release_requires_inactive_node() {
        let (mut graph, _, tee, _, _) = fanned_graph();
        let ports = graph.request_ports(tee);
        graph.activate();

        assert!(matches!(
            graph.release_port(ports[0]),
            Err(GraphError::ReleaseWhileActive(_))
        ));
        assert!(graph.port(ports[0]).unwrap().is_linked());

        graph.deactivate();
        assert_eq!(graph.release_port(ports[0]), Ok(true));
    }

    #[test]
    fn test_release_static_port_rejected() {
        let mut graph = Graph::new();
        let queue = add(&mut graph, "queue", ElementType::Queue);
        let sink = graph.static_port(queue, "sink").unwrap();
        assert!(matches!(graph.release_port(sink), Err(GraphError::NotRequestPort(_))));
    }

    #[test]
    fn test_request_port_limits() {
        let mut graph = Graph::new();
        let queue = add(&mut graph, "queue", ElementType::Queue);
        assert!(matches!(graph.request_port(queue), Err(GraphError::NotFanout(_))));

        let mut spec = NodeSpec::new("tee", ElementType::Tee);
        spec.properties.max_request_ports = Some(1);
        let tee = graph.add_node(&spec).unwrap();
        graph.request_port(tee).unwrap();
        assert!(matches!(
            graph.request_port(tee),
            Err(GraphError::RequestRefused { limit: 1, .. })
        ));
    }

    #[test]
    fn test_caps_checked_through_queues() {
        let mut graph = Graph::new();
        let src = add(&mut graph, "src", ElementType::AppSource);
        let queue = add(&mut graph, "queue", ElementType::Queue);
        let other = StreamFormat::new(SampleFormat::F32LE, 48000, 2);
        let app = graph
            .add_node(&NodeSpec::new("app", ElementType::AppSink).with_caps(other))
            .unwrap();

        // The queue takes on the app sink's format once linked to it
        graph.link_nodes(queue, app).unwrap();
        assert!(graph.link_nodes(src, queue).is_err());

        let mut graph = Graph::new();
        let src = add(&mut graph, "src", ElementType::AppSource);
        let q1 = add(&mut graph, "q1", ElementType::Queue);
        let q2 = add(&mut graph, "q2", ElementType::Queue);
        let app = graph
            .add_node(&NodeSpec::new("app", ElementType::AppSink).with_caps(other))
            .unwrap();
        graph.link_nodes(src, q1).unwrap();
        graph.link_nodes(q2, app).unwrap();
        let q1_src = graph.static_port(q1, "src").unwrap();
        let q2_sink = graph.static_port(q2, "sink").unwrap();
        // Both queues are resolved before the link is accepted
        assert!(graph.link(q1_src, q2_sink).is_err());
        assert!(graph.negotiate().is_ok());
    }

    #[test]
    fn test_topological_order() {
        let (graph, src, tee, audio, app) = fanned_graph();
        let order = graph.topological_order().unwrap();
        let pos = |id| order.iter().position(|&n| n == id).unwrap();

        assert_eq!(order.len(), graph.node_count());
        assert!(pos(src) < pos(tee));
        assert!(pos(tee) < pos(audio));
        assert!(pos(tee) < pos(app));
    }

    #[test]
    fn test_activation_requests_data() {
        let (mut graph, src, _, _, _) = fanned_graph();
        let rx = graph.bus_receiver();
        graph.activate();

        let messages: Vec<GraphMessage> = rx.try_iter().collect();
        let state_changes = messages
            .iter()
            .filter(|m| matches!(m, GraphMessage::Bus(BusMessage::StateChanged { .. })))
            .count();
        assert_eq!(state_changes, graph.node_count());
        assert_eq!(
            messages.last(),
            Some(&GraphMessage::Signal {
                node: src,
                signal: ElementSignal::NeedData { hint: 200_000 }
            })
        );
    }

    #[test]
    fn test_push_requires_active_source() {
        let (mut graph, src, tee, _, _) = fanned_graph();
        assert_eq!(graph.push(src, chunk(0)), FlowReturn::Flushing);
        assert_eq!(graph.push(tee, chunk(0)), FlowReturn::Error);

        graph.activate();
        assert_eq!(graph.push(src, chunk(0)), FlowReturn::Ok);
        assert_eq!(graph.app_source(src).unwrap().queued_bytes(), 4);
    }

    #[test]
    fn test_advance_fans_out_to_every_branch() {
        let (mut graph, src, _, audio, app) = fanned_graph();
        graph.activate();
        let rx = graph.bus_receiver();
        rx.try_iter().for_each(drop);

        graph.push(src, chunk(0));
        graph.push(src, chunk(10));
        graph.advance(ClockTime::from_nseconds(5));

        assert_eq!(graph.rendered(audio), Some(1));
        assert_eq!(graph.app_sink(app).unwrap().available(), 1);
        assert_eq!(graph.app_source(src).unwrap().queued().count(), 1);

        graph.advance(ClockTime::from_nseconds(10));
        assert_eq!(graph.rendered(audio), Some(2));
        assert_eq!(graph.pull_sample(app).unwrap().pts(), ClockTime::ZERO);

        let messages: Vec<GraphMessage> = rx.try_iter().collect();
        assert!(messages.contains(&GraphMessage::Signal {
            node: app,
            signal: ElementSignal::NewSample
        }));
        // Drained: ask for more
        assert!(messages.contains(&GraphMessage::Signal {
            node: src,
            signal: ElementSignal::NeedData { hint: 200_000 }
        }));
    }

    #[test]
    fn test_unlinked_tee_posts_error() {
        let mut graph = Graph::new();
        let src = add(&mut graph, "src", ElementType::AppSource);
        let tee = add(&mut graph, "tee", ElementType::Tee);
        graph.link_nodes(src, tee).unwrap();
        graph.activate();
        let rx = graph.bus_receiver();
        rx.try_iter().for_each(drop);

        graph.push(src, chunk(0));
        graph.advance(ClockTime::from_nseconds(100));

        let errors: Vec<GraphMessage> = rx
            .try_iter()
            .filter(|m| matches!(m, GraphMessage::Bus(BusMessage::Error { .. })))
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(graph.push(src, chunk(10)), FlowReturn::Error);
    }

    #[test]
    fn test_end_of_stream_reaches_all_sinks() {
        let (mut graph, src, _, _, _) = fanned_graph();
        graph.activate();
        let rx = graph.bus_receiver();

        graph.push(src, chunk(0));
        graph.end_of_stream(src).unwrap();
        assert_eq!(graph.push(src, chunk(10)), FlowReturn::Eos);

        graph.advance(ClockTime::from_nseconds(100));
        let eos = rx
            .try_iter()
            .filter(|m| *m == GraphMessage::Bus(BusMessage::Eos))
            .count();
        assert_eq!(eos, 1);

        // Posted once only
        graph.advance(ClockTime::from_nseconds(200));
        assert_eq!(rx.try_iter().filter(|m| *m == GraphMessage::Bus(BusMessage::Eos)).count(), 0);
    }

    #[test]
    fn test_deactivate_clears_queue() {
        let (mut graph, src, _, _, _) = fanned_graph();
        graph.activate();
        graph.push(src, chunk(0));
        graph.deactivate();

        assert!(!graph.is_active());
        assert_eq!(graph.app_source(src).unwrap().queued_bytes(), 0);
        assert_eq!(graph.push(src, chunk(0)), FlowReturn::Flushing);
    }

    #[test]
    fn test_flush_bus_drops_messages() {
        let (mut graph, _, _, _, _) = fanned_graph();
        let rx = graph.bus_receiver();
        graph.activate();
        graph.flush_bus();
        graph.deactivate();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_clear_releases_everything() {
        let (mut graph, _, _, _, _) = fanned_graph();
        graph.clear();
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.port_count(), 0);
        assert_eq!(graph.link_count(), 0);
    }
}
