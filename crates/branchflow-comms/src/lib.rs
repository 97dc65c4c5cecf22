//! Messages flowing from a graph to the loop that drives it.
//!
//! A graph owns one [`Bus`]. Elements post lifecycle and error notifications
//! ([`BusMessage`]) and backpressure/sample signals ([`ElementSignal`]) to it;
//! the loop side holds a cloned [`BusReceiver`] and dispatches them in order.

use branchflow_core::NodeId;
use crossbeam_channel::{Receiver, Sender};

/// Activation state of a single element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementState {
    Inactive,
    Active,
}

/// Graph-wide notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    /// An element changed activation state
    StateChanged {
        /// Name of the element
        source: String,
        old: ElementState,
        new: ElementState,
    },
    /// Unrecoverable streaming error
    Error {
        /// Name of the element that posted the error
        source: String,
        /// Opaque human-readable diagnostic
        diagnostic: String,
    },
    /// Every sink received end-of-stream
    Eos,
}

impl BusMessage {
    /// The topic subscribers use to select this message
    #[must_use]
    pub const fn topic(&self) -> MessageTopic {
        match self {
            Self::StateChanged { .. } => MessageTopic::StateChanged,
            Self::Error { .. } => MessageTopic::Error,
            Self::Eos => MessageTopic::Eos,
        }
    }
}

/// Subscription topics, one per [`BusMessage`] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTopic {
    StateChanged,
    Error,
    Eos,
}

/// Signals emitted by individual elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementSignal {
    /// A source queue ran low; `hint` is the number of bytes it can take
    NeedData { hint: usize },
    /// A source queue is full
    EnoughData,
    /// An application sink holds a sample ready to be pulled
    NewSample,
}

/// Everything a graph sends to its loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphMessage {
    Bus(BusMessage),
    Signal { node: NodeId, signal: ElementSignal },
}

/// Receiving side of a graph bus (loop side)
pub type BusReceiver = Receiver<GraphMessage>;

/// Unbounded message channel owned by a graph.
///
/// While flushing, posted messages are dropped and nothing stays queued.
pub struct Bus {
    tx: Sender<GraphMessage>,
    rx: Receiver<GraphMessage>,
    flushing: bool,
}

impl Bus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            flushing: false,
        }
    }

    /// Post a graph-wide notification
    pub fn post(&self, message: BusMessage) {
        self.send(GraphMessage::Bus(message));
    }

    /// Emit an element signal
    pub fn emit(&self, node: NodeId, signal: ElementSignal) {
        self.send(GraphMessage::Signal { node, signal });
    }

    fn send(&self, message: GraphMessage) {
        if self.flushing {
            return;
        }
        // Cannot fail: the bus keeps its own receiver alive.
        let _ = self.tx.send(message);
    }

    /// A receiver for the loop side; all clones share one queue
    #[must_use]
    pub fn receiver(&self) -> BusReceiver {
        self.rx.clone()
    }

    /// Drop pending messages and, while `flushing`, refuse new ones
    pub fn set_flushing(&mut self, flushing: bool) {
        self.flushing = flushing;
        if flushing {
            while self.rx.try_recv().is_ok() {}
        }
    }

    #[must_use]
    pub const fn is_flushing(&self) -> bool {
        self.flushing
    }

    /// Number of messages not yet received
    #[must_use]
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
