//! Runtime for branchflow graphs.
//!
//! This crate provides the chirped oscillator, the backpressure-driven
//! [`SampleProducer`], the cooperative [`MainLoop`], the topic-based
//! [`EventBus`] and the [`Runner`] that owns a graph's lifecycle.

pub mod config;
pub mod event_bus;
pub mod main_loop;
pub mod oscillator;
pub mod producer;
pub mod runner;

pub use config::RunnerConfig;
pub use event_bus::{EventBus, MessageHandler, SubscriptionId};
pub use main_loop::{Dispatch, LoopControl, LoopHandle, MainLoop, SourceId, Task};
pub use oscillator::Oscillator;
pub use producer::{ChunkSink, ProducerError, ProducerState, SampleProducer};
pub use runner::{GraphState, Runner, RunnerError, SampleHandler, SourceFeed};
