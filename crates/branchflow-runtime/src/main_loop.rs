//! Single-threaded cooperative scheduler.
//!
//! The loop never calls back into user code. [`MainLoop::next_dispatch`]
//! picks the next unit of work (a control request, a graph message, a due
//! timeout or an idle source) and hands it to the caller, which runs it to
//! completion before asking again. Nothing executes concurrently, so the
//! state the caller owns needs no locking.
//!
//! Priority, highest first: control requests, graph messages, due timeouts,
//! idle sources. Idle sources are served round-robin. When nothing is ready
//! the loop blocks on its channels until a message arrives or the next
//! timeout is due.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use branchflow_comms::{BusReceiver, GraphMessage};
use crossbeam_channel::{Receiver, Sender, select};

/// Handle of a registered idle or timeout source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// Work a source stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    /// Generate and push one chunk
    Produce,
    /// Advance the streaming clock
    ClockTick,
}

/// Requests sent to the loop from any thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Stop,
}

/// Cloneable, `Send` handle for controlling a loop from elsewhere
#[derive(Debug, Clone)]
pub struct LoopHandle {
    tx: Sender<LoopControl>,
}

impl LoopHandle {
    /// Ask the loop to stop. Returns false if the loop no longer exists.
    pub fn request_stop(&self) -> bool {
        self.tx.send(LoopControl::Stop).is_ok()
    }
}

/// One unit of work chosen by the loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Control(LoopControl),
    Graph(GraphMessage),
    Task { id: SourceId, task: Task },
}

#[derive(Debug)]
struct IdleSource {
    id: SourceId,
    task: Task,
}

#[derive(Debug)]
struct TimeoutSource {
    id: SourceId,
    task: Task,
    interval: Duration,
    deadline: Instant,
}

pub struct MainLoop {
    next_id: u64,
    idle: VecDeque<IdleSource>,
    timeouts: Vec<TimeoutSource>,
    control_tx: Sender<LoopControl>,
    control_rx: Receiver<LoopControl>,
}

impl MainLoop {
    #[must_use]
    pub fn new() -> Self {
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        Self {
            next_id: 1,
            idle: VecDeque::new(),
            timeouts: Vec::new(),
            control_tx,
            control_rx,
        }
    }

    /// Get a handle that can stop the loop from another thread
    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            tx: self.control_tx.clone(),
        }
    }

    fn allocate_id(&mut self) -> SourceId {
        let id = SourceId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Register a task to run whenever nothing else is ready
    pub fn add_idle(&mut self, task: Task) -> SourceId {
        let id = self.allocate_id();
        self.idle.push_back(IdleSource { id, task });
        tracing::debug!("Added idle {} ({:?})", id, task);
        id
    }

    /// Register a task to run every `interval`
    pub fn add_timeout(&mut self, interval: Duration, task: Task) -> SourceId {
        let id = self.allocate_id();
        self.timeouts.push(TimeoutSource {
            id,
            task,
            interval,
            deadline: Instant::now() + interval,
        });
        tracing::debug!("Added timeout {} every {:?} ({:?})", id, interval, task);
        id
    }

    /// Deregister a source. Returns false if it was not registered.
    pub fn remove(&mut self, id: SourceId) -> bool {
        let before = self.idle.len() + self.timeouts.len();
        self.idle.retain(|source| source.id != id);
        self.timeouts.retain(|source| source.id != id);
        let removed = before != self.idle.len() + self.timeouts.len();
        if removed {
            tracing::debug!("Removed {}", id);
        }
        removed
    }

    /// Check if a source is still registered
    #[must_use]
    pub fn contains(&self, id: SourceId) -> bool {
        self.idle.iter().any(|source| source.id == id) || self.timeouts.iter().any(|source| source.id == id)
    }

    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    #[must_use]
    pub fn timeout_count(&self) -> usize {
        self.timeouts.len()
    }

    fn due_timeout(&mut self, now: Instant) -> Option<Dispatch> {
        let source = self
            .timeouts
            .iter_mut()
            .filter(|source| source.deadline <= now)
            .min_by_key(|source| source.deadline)?;

        source.deadline += source.interval;
        // Skip missed ticks rather than firing a burst
        if source.deadline <= now {
            source.deadline = now + source.interval;
        }
        Some(Dispatch::Task {
            id: source.id,
            task: source.task,
        })
    }

    fn next_idle(&mut self) -> Option<Dispatch> {
        let source = self.idle.pop_front()?;
        let dispatch = Dispatch::Task {
            id: source.id,
            task: source.task,
        };
        self.idle.push_back(source);
        Some(dispatch)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timeouts.iter().map(|source| source.deadline).min()
    }

    /// Pick the next unit of work.
    ///
    /// With `may_block`, waits until something is ready. Returns `None` when
    /// nothing is ready and blocking is not allowed, or when the graph side
    /// of the bus has gone away.
    pub fn next_dispatch(&mut self, graph_rx: Option<&BusReceiver>, may_block: bool) -> Option<Dispatch> {
        let never = crossbeam_channel::never();
        let graph_rx = graph_rx.unwrap_or(&never);

        loop {
            if let Ok(control) = self.control_rx.try_recv() {
                return Some(Dispatch::Control(control));
            }
            if let Ok(message) = graph_rx.try_recv() {
                return Some(Dispatch::Graph(message));
            }
            if let Some(dispatch) = self.due_timeout(Instant::now()) {
                return Some(dispatch);
            }
            if let Some(dispatch) = self.next_idle() {
                return Some(dispatch);
            }
            if !may_block {
                return None;
            }

            let timer = self
                .next_deadline()
                .map_or_else(crossbeam_channel::never, crossbeam_channel::at);

            select! {
                recv(self.control_rx) -> control => {
                    if let Ok(control) = control {
                        return Some(Dispatch::Control(control));
                    }
                }
                recv(graph_rx) -> message => {
                    return message.ok().map(Dispatch::Graph);
                }
                recv(timer) -> _ => {}
            }
        }
    }
}

impl Default for MainLoop {
    fn default() -> Self {
        Self::new()
    }
}
