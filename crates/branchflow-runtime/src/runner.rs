//! Graph lifecycle and the loop that drives it.
//!
//! The runner owns the graph, the producer, the event bus and the main loop.
//! Every dispatch the loop hands back is handled here, on one thread, to
//! completion.

use std::fmt;
use std::time::{Duration, Instant};

use branchflow_comms::{BusMessage, BusReceiver, ElementSignal, GraphMessage, MessageTopic};
use branchflow_core::{ClockTime, FlowReturn, NodeId, SampleChunk};
use branchflow_graph::{
    BuildError, ElementType, FanoutError, FanoutLink, FanoutManager, Graph, GraphBuilder, GraphError, NodeKind,
    PipelineDescription, PortId,
};

use crate::config::RunnerConfig;
use crate::event_bus::{EventBus, SubscriptionId};
use crate::main_loop::{Dispatch, LoopControl, LoopHandle, MainLoop, SourceId, Task};
use crate::producer::{ChunkSink, ProducerError, SampleProducer};

/// Lifecycle of the graph a runner drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphState {
    Unbuilt,
    Ready,
    Active,
    /// Terminal
    Stopped,
}

impl fmt::Display for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unbuilt => "UNBUILT",
            Self::Ready => "READY",
            Self::Active => "ACTIVE",
            Self::Stopped => "STOPPED",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Invalid state transition {from} -> {to}")]
    InvalidTransition { from: GraphState, to: GraphState },

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Fanout(#[from] FanoutError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Producer(#[from] ProducerError),

    #[error("Pipeline has no app source")]
    NoSource,

    #[error("Streaming failed in {element}: {diagnostic}")]
    Stream { element: String, diagnostic: String },
}

/// Pushes produced chunks into one app source of a graph
pub struct SourceFeed<'a> {
    pub graph: &'a mut Graph,
    pub node: NodeId,
}

impl ChunkSink for SourceFeed<'_> {
    fn push_chunk(&mut self, chunk: SampleChunk) -> FlowReturn {
        self.graph.push(self.node, chunk)
    }
}

/// Handler for samples pulled from an app sink
pub type SampleHandler = Box<dyn FnMut(NodeId, &SampleChunk)>;

pub struct Runner {
    config: RunnerConfig,
    state: GraphState,
    graph: Option<Graph>,
    bus_rx: Option<BusReceiver>,
    source: Option<NodeId>,
    app_sinks: Vec<NodeId>,
    fanout: FanoutManager,
    producer: Option<SampleProducer>,
    events: EventBus,
    main_loop: MainLoop,
    running_time: ClockTime,
    last_tick: Instant,
    tick: Option<SourceId>,
    sample_handler: Option<SampleHandler>,
    quit: bool,
    /// Error message that stopped the graph, reported by `run`
    failure: Option<RunnerError>,
}

impl Runner {
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            state: GraphState::Unbuilt,
            graph: None,
            bus_rx: None,
            source: None,
            app_sinks: Vec::new(),
            fanout: FanoutManager::new(),
            producer: None,
            events: EventBus::new(),
            main_loop: MainLoop::new(),
            running_time: ClockTime::ZERO,
            last_tick: Instant::now(),
            tick: None,
            sample_handler: None,
            quit: false,
            failure: None,
        }
    }

    /// Get the current lifecycle state
    #[must_use]
    pub const fn state(&self) -> GraphState {
        self.state
    }

    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The graph, while built
    #[must_use]
    pub const fn graph(&self) -> Option<&Graph> {
        self.graph.as_ref()
    }

    #[must_use]
    pub const fn producer(&self) -> Option<&SampleProducer> {
        self.producer.as_ref()
    }

    /// The app source the producer feeds
    #[must_use]
    pub const fn source(&self) -> Option<NodeId> {
        self.source
    }

    /// App sinks whose samples reach `on_new_sample` handlers
    #[must_use]
    pub fn app_sinks(&self) -> &[NodeId] {
        &self.app_sinks
    }

    /// Fan-out branches currently attached
    #[must_use]
    pub fn fanout_links(&self) -> &[FanoutLink] {
        self.fanout.links()
    }

    /// Idle sources registered on the loop
    #[must_use]
    pub fn idle_registrations(&self) -> usize {
        self.main_loop.idle_count()
    }

    /// Streaming clock time since start
    #[must_use]
    pub const fn running_time(&self) -> ClockTime {
        self.running_time
    }

    /// Handle for stopping [`run`](Self::run) from another thread
    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        self.main_loop.handle()
    }

    /// Subscribe to graph messages on `topic`
    pub fn subscribe(&mut self, topic: MessageTopic, handler: impl FnMut(&BusMessage) + 'static) -> SubscriptionId {
        self.events.subscribe(topic, handler)
    }

    /// Receive every sample the app sinks hand back
    pub fn on_new_sample(&mut self, handler: impl FnMut(NodeId, &SampleChunk) + 'static) {
        self.sample_handler = Some(Box::new(handler));
    }

    fn transition(&mut self, to: GraphState) {
        tracing::info!("Graph state {} -> {}", self.state, to);
        self.state = to;
    }

    fn expect_state(&self, expected: GraphState, to: GraphState) -> Result<(), RunnerError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RunnerError::InvalidTransition { from: self.state, to })
        }
    }

    /// UNBUILT -> READY: build and link every node, then attach the fan-out.
    ///
    /// On failure nothing survives and the runner stays UNBUILT, so the
    /// caller can retry with another description.
    pub fn build(&mut self, description: &PipelineDescription) -> Result<(), RunnerError> {
        self.expect_state(GraphState::Unbuilt, GraphState::Ready)?;

        let mut description = description.clone();
        for spec in &mut description.nodes {
            if spec.element == ElementType::AppSink && spec.properties.max_buffers.is_none() {
                spec.properties.max_buffers = Some(self.config.sample_queue);
            }
        }

        let mut graph = GraphBuilder::from_description(&description).build()?;

        let source = graph
            .nodes_of_kind(NodeKind::Source)
            .first()
            .copied()
            .ok_or(RunnerError::NoSource)?;
        let format = graph.source_format(source).ok_or(RunnerError::NoSource)?;
        let producer = SampleProducer::new(format, self.config.chunk_bytes)?;

        if let Some(fanout) = &description.fanout {
            let (node, branches) = fanout.resolve(&graph)?;
            self.fanout.attach(&mut graph, node, &branches)?;
        }

        self.app_sinks = graph
            .nodes_of_kind(NodeKind::Sink)
            .into_iter()
            .filter(|&node| graph.app_sink(node).is_some())
            .collect();
        self.bus_rx = Some(graph.bus_receiver());
        self.graph = Some(graph);
        self.source = Some(source);
        self.producer = Some(producer);

        tracing::info!("Pipeline '{}' ready ({})", description.name, format);
        self.transition(GraphState::Ready);
        Ok(())
    }

    /// READY -> ACTIVE: check formats end to end and activate every node
    pub fn start(&mut self) -> Result<(), RunnerError> {
        self.expect_state(GraphState::Ready, GraphState::Active)?;
        let Some(graph) = self.graph.as_mut() else {
            return Err(RunnerError::InvalidTransition {
                from: self.state,
                to: GraphState::Active,
            });
        };

        graph.negotiate()?;
        graph.activate();

        self.running_time = ClockTime::ZERO;
        self.last_tick = Instant::now();
        if let Some(interval) = self.config.tick_interval {
            self.tick = Some(self.main_loop.add_timeout(interval, Task::ClockTick));
        }

        self.transition(GraphState::Active);
        Ok(())
    }

    /// -> STOPPED. Deactivates the graph, releases the fan-out request ports,
    /// then drops the graph. Calling it again does nothing.
    pub fn stop(&mut self) {
        match self.state {
            GraphState::Stopped => return,
            GraphState::Unbuilt => {
                self.events.close();
                self.transition(GraphState::Stopped);
                return;
            }
            GraphState::Ready | GraphState::Active => {}
        }

        if let Some(producer) = self.producer.as_mut() {
            producer.cancel(&mut self.main_loop);
        }
        if let Some(tick) = self.tick.take() {
            self.main_loop.remove(tick);
        }

        if let Some(mut graph) = self.graph.take() {
            let released = teardown(&mut graph, &mut self.fanout);
            tracing::debug!("Released {} request ports", released.len());
        }
        self.bus_rx = None;
        self.events.close();
        self.transition(GraphState::Stopped);
    }

    /// Drive the loop until a stop request or a graph error is handled.
    ///
    /// # Errors
    ///
    /// `Stream` when an error message from the graph stopped it
    pub fn run(&mut self) -> Result<(), RunnerError> {
        self.expect_state(GraphState::Active, GraphState::Active)?;
        tracing::info!("Running");

        self.quit = false;
        while !self.quit {
            self.iterate(true);
        }

        tracing::info!("Main loop finished");
        self.failure.take().map_or(Ok(()), Err)
    }

    /// Handle one dispatch. Returns false if there was nothing to do.
    pub fn iterate(&mut self, may_block: bool) -> bool {
        let Some(dispatch) = self.main_loop.next_dispatch(self.bus_rx.as_ref(), may_block) else {
            return false;
        };

        match dispatch {
            Dispatch::Control(LoopControl::Stop) => {
                tracing::info!("Stop requested");
                self.stop();
                self.quit = true;
            }
            Dispatch::Graph(GraphMessage::Bus(message)) => self.handle_message(&message),
            Dispatch::Graph(GraphMessage::Signal { node, signal }) => self.handle_signal(node, signal),
            Dispatch::Task {
                id,
                task: Task::Produce,
            } => self.produce(id),
            Dispatch::Task {
                task: Task::ClockTick,
                ..
            } => self.tick(),
        }
        true
    }

    fn handle_message(&mut self, message: &BusMessage) {
        self.events.dispatch(message);

        match message {
            BusMessage::Error { source, diagnostic } => {
                tracing::error!("Error received from element {}: {}", source, diagnostic);
                self.failure = Some(RunnerError::Stream {
                    element: source.clone(),
                    diagnostic: diagnostic.clone(),
                });
                self.stop();
                self.quit = true;
            }
            BusMessage::Eos => tracing::info!("End of stream reached"),
            BusMessage::StateChanged { source, old, new } => {
                tracing::debug!("{} changed state from {:?} to {:?}", source, old, new);
            }
        }
    }

    /// React to an element signal
    pub fn handle_signal(&mut self, node: NodeId, signal: ElementSignal) {
        if self.state != GraphState::Active {
            return;
        }

        match signal {
            ElementSignal::NeedData { hint } if Some(node) == self.source => {
                if let Some(producer) = self.producer.as_mut() {
                    producer.need_data(hint, &mut self.main_loop);
                }
            }
            ElementSignal::EnoughData if Some(node) == self.source => {
                if let Some(producer) = self.producer.as_mut() {
                    producer.enough_data(&mut self.main_loop);
                }
            }
            ElementSignal::NewSample => self.drain_samples(node),
            ElementSignal::NeedData { .. } | ElementSignal::EnoughData => {
                tracing::warn!("Ignoring {:?} from {}", signal, node);
            }
        }
    }

    fn produce(&mut self, id: SourceId) {
        let (Some(producer), Some(graph), Some(node)) = (self.producer.as_mut(), self.graph.as_mut(), self.source)
        else {
            self.main_loop.remove(id);
            return;
        };

        let mut feed = SourceFeed { graph, node };
        if producer.produce_one(&mut feed).is_break() {
            self.main_loop.remove(id);
        }
    }

    fn tick(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_tick);
        self.last_tick = now;
        self.advance_clock(elapsed);
    }

    /// Move the streaming clock forward and release every chunk now due
    pub fn advance_clock(&mut self, elapsed: Duration) {
        if self.state != GraphState::Active {
            return;
        }
        self.running_time += ClockTime::from(elapsed);
        if let Some(graph) = self.graph.as_mut() {
            graph.advance(self.running_time);
        }
    }

    fn drain_samples(&mut self, node: NodeId) {
        let Some(graph) = self.graph.as_mut() else {
            return;
        };
        while let Some(chunk) = graph.pull_sample(node) {
            if let Some(handler) = self.sample_handler.as_mut() {
                handler(node, &chunk);
            }
        }
    }

    /// Tell the source no more data will come
    pub fn end_of_stream(&mut self) -> Result<(), RunnerError> {
        let (Some(graph), Some(source)) = (self.graph.as_mut(), self.source) else {
            return Err(RunnerError::NoSource);
        };
        graph.end_of_stream(source)?;
        Ok(())
    }
}

/// Deactivate every node, then release the fan-out request ports newest
/// first, then silence the bus. Returns the released ports in order.
fn teardown(graph: &mut Graph, fanout: &mut FanoutManager) -> Vec<PortId> {
    graph.deactivate();
    let released = fanout.detach(graph);
    graph.flush_bus();
    released
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        self.stop();
    }
}
