//! End-to-end runner scenarios on the three-branch pipeline.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use branchflow_comms::{BusMessage, ElementSignal, MessageTopic};
use branchflow_core::{ClockTime, SampleFormat, StreamFormat};
use branchflow_graph::PipelineDescription;
use branchflow_runtime::{GraphState, ProducerState, Runner, RunnerConfig};

fn description() -> PipelineDescription {
    PipelineDescription::three_branch(StreamFormat::new(SampleFormat::S16LE, 44100, 1))
}

/// Iterate without blocking until the producer reaches `state`
fn iterate_until(runner: &mut Runner, state: ProducerState) {
    for _ in 0..1000 {
        if runner.producer().map(|p| p.state()) == Some(state) {
            return;
        }
        runner.iterate(false);
    }
    panic!("producer never reached {state:?}");
}

#[test]
fn test_five_feeding_cycles() {
    let mut runner = Runner::new(RunnerConfig::manual_clock());
    let mut states = vec![runner.state()];

    runner.build(&description()).unwrap();
    states.push(runner.state());
    runner.start().unwrap();
    states.push(runner.state());

    let source = runner.source().unwrap();
    for cycle in 0..5u64 {
        if cycle > 0 {
            runner.handle_signal(source, ElementSignal::NeedData { hint: 1024 });
        }
        iterate_until(&mut runner, ProducerState::Feeding);
        assert_eq!(runner.idle_registrations(), 1);

        // Bus is drained, so the next dispatch is the producer's idle source
        assert!(runner.iterate(false));
        assert_eq!(runner.producer().unwrap().chunks_produced(), cycle + 1);

        runner.handle_signal(source, ElementSignal::EnoughData);
        assert_eq!(runner.producer().unwrap().state(), ProducerState::Idle);
        assert_eq!(runner.idle_registrations(), 0);
        assert_eq!(runner.state(), GraphState::Active);
    }

    let graph = runner.graph().unwrap();
    let queued: Vec<ClockTime> = graph
        .app_source(source)
        .unwrap()
        .queued()
        .map(|chunk| chunk.pts())
        .collect();
    assert_eq!(queued.len(), 5);
    assert!(queued.windows(2).all(|pair| pair[0] < pair[1]));

    runner.stop();
    states.push(runner.state());
    assert_eq!(
        states,
        vec![
            GraphState::Unbuilt,
            GraphState::Ready,
            GraphState::Active,
            GraphState::Stopped
        ]
    );
}

#[test]
fn test_graph_error_stops_runner() {
    // No fan-out: the tee has nowhere to send data
    let mut unfanned = description();
    unfanned.fanout = None;

    let mut runner = Runner::new(RunnerConfig::manual_clock());
    let errors = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&errors);
    runner.subscribe(MessageTopic::Error, move |message| {
        if let BusMessage::Error { diagnostic, .. } = message {
            seen.borrow_mut().push(diagnostic.clone());
        }
    });

    runner.build(&unfanned).unwrap();
    runner.start().unwrap();
    iterate_until(&mut runner, ProducerState::Feeding);
    runner.iterate(false);

    runner.advance_clock(Duration::from_secs(1));
    for _ in 0..100 {
        if runner.state() == GraphState::Stopped {
            break;
        }
        runner.iterate(false);
    }

    assert_eq!(runner.state(), GraphState::Stopped);
    assert_eq!(
        *errors.borrow(),
        vec!["Internal data stream error: streaming stopped, reason not-linked".to_string()]
    );
}

#[test]
fn test_run_returns_after_stop_request() {
    let config = RunnerConfig {
        tick_interval: Some(Duration::from_millis(2)),
        ..RunnerConfig::default()
    };
    let mut runner = Runner::new(config);
    let samples = Rc::new(RefCell::new(0usize));
    let counter = Rc::clone(&samples);
    runner.on_new_sample(move |_, _| *counter.borrow_mut() += 1);

    runner.build(&description()).unwrap();
    runner.start().unwrap();

    let handle = runner.handle();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        handle.request_stop()
    });

    runner.run().unwrap();
    assert!(stopper.join().unwrap());

    assert_eq!(runner.state(), GraphState::Stopped);
    assert!(runner.graph().is_none());
    assert!(runner.fanout_links().is_empty());
    assert!(*samples.borrow() > 0);
}

#[test]
fn test_end_of_stream_does_not_stop() {
    let mut runner = Runner::new(RunnerConfig::manual_clock());
    let eos = Rc::new(RefCell::new(0));
    let seen = Rc::clone(&eos);
    runner.subscribe(MessageTopic::Eos, move |_| *seen.borrow_mut() += 1);

    runner.build(&description()).unwrap();
    runner.start().unwrap();
    iterate_until(&mut runner, ProducerState::Feeding);
    runner.iterate(false);

    runner.end_of_stream().unwrap();
    // Pushing after end-of-stream ends feeding
    runner.iterate(false);
    assert_eq!(runner.producer().unwrap().state(), ProducerState::Idle);

    runner.advance_clock(Duration::from_secs(1));
    while runner.iterate(false) {}

    assert_eq!(*eos.borrow(), 1);
    assert_eq!(runner.state(), GraphState::Active);
    runner.stop();
}
