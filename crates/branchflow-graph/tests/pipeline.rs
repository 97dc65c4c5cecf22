//! Building the three-branch pipeline from descriptions, with fan-out
//! attach/detach and failure unwinding.

use branchflow_core::{SampleFormat, StreamFormat};
use branchflow_graph::{
    BuildError, ElementType, FanoutError, FanoutManager, GraphBuilder, GraphError, LinkRefusal, NodeSpec,
    PipelineDescription,
};

fn format() -> StreamFormat {
    StreamFormat::new(SampleFormat::S16LE, 44100, 1)
}

#[test]
fn test_three_branch_builds_and_negotiates() {
    let description = PipelineDescription::three_branch(format());
    let mut graph = GraphBuilder::from_description(&description).build().unwrap();
    assert_eq!(graph.node_count(), 13);
    assert_eq!(graph.link_count(), 9);

    let (tee, branches) = description.fanout.as_ref().unwrap().resolve(&graph).unwrap();
    let mut fanout = FanoutManager::new();
    let links = fanout.attach(&mut graph, tee, &branches).unwrap();
    assert_eq!(links.len(), 3);

    assert_eq!(graph.link_count(), 12);
    assert!(graph.negotiate().is_ok());

    assert_eq!(fanout.detach(&mut graph).len(), 3);
    assert_eq!(graph.link_count(), 9);
}

#[test]
fn test_second_link_failure_leaves_nothing_behind() {
    let broken = GraphBuilder::new()
        .node(NodeSpec::new("src", ElementType::AppSource).with_caps(format()))
        .node(NodeSpec::new("queue", ElementType::Queue))
        .node(NodeSpec::new("scope", ElementType::Wavescope))
        .node(NodeSpec::new("sink", ElementType::AudioSink))
        .link("src", "queue")
        .link("scope", "sink")
        .link("queue", "scope");

    let Err(err) = broken.build() else {
        panic!("build should fail on the second link");
    };
    match err {
        BuildError::LinkFailed { from, to, source } => {
            assert_eq!(from, "scope");
            assert_eq!(to, "sink");
            assert!(matches!(source, GraphError::NoCompatiblePorts { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }

    // Same names, valid links: builds independently
    let graph = GraphBuilder::new()
        .node(NodeSpec::new("src", ElementType::AppSource).with_caps(format()))
        .node(NodeSpec::new("queue", ElementType::Queue))
        .node(NodeSpec::new("scope", ElementType::Wavescope))
        .node(NodeSpec::new("sink", ElementType::VideoSink))
        .link("src", "queue")
        .link("scope", "sink")
        .link("queue", "scope")
        .build()
        .unwrap();
    assert_eq!(graph.node_count(), 4);
    assert_eq!(graph.link_count(), 3);
}

#[test]
fn test_fanout_failure_at_each_branch() {
    for k in 0..3 {
        let description = PipelineDescription::three_branch(format());
        let mut graph = GraphBuilder::from_description(&description).build().unwrap();
        let (tee, branches) = description.fanout.as_ref().unwrap().resolve(&graph).unwrap();

        // Occupy branch k's entry so linking it fails
        let extra = graph
            .add_node(&NodeSpec::new("intruder", ElementType::Queue))
            .unwrap();
        let intruder_src = graph.static_port(extra, "src").unwrap();
        graph.link(intruder_src, branches[k]).unwrap();
        let static_links = graph.link_count();

        let mut fanout = FanoutManager::new();
        let err = fanout.attach(&mut graph, tee, &branches).unwrap_err();
        match err {
            FanoutError::FanoutLinkFailed { index, source } => {
                assert_eq!(index, k);
                assert!(matches!(
                    source,
                    GraphError::LinkRefused {
                        reason: LinkRefusal::AlreadyLinked,
                        ..
                    }
                ));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(fanout.links().is_empty());
        assert!(graph.request_ports(tee).is_empty());
        assert_eq!(graph.link_count(), static_links);

        // Free the entry and retry
        graph.unlink(branchflow_graph::Link {
            src: intruder_src,
            sink: branches[k],
        });
        assert_eq!(fanout.attach(&mut graph, tee, &branches).unwrap().len(), 3);
    }
}

#[test]
fn test_description_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.ron");

    let description = PipelineDescription::three_branch(StreamFormat::new(SampleFormat::F32LE, 48000, 2));
    description.save(&path).unwrap();

    let loaded = PipelineDescription::load(&path).unwrap();
    assert_eq!(loaded, description);

    let graph = GraphBuilder::from_description(&loaded).build().unwrap();
    let src = graph.node_by_name("app_source").unwrap();
    assert_eq!(graph.source_format(src), Some(loaded.format));
}

#[test]
fn test_mismatched_app_sink_is_refused() {
    let mut description = PipelineDescription::three_branch(format());
    let app_sink = description
        .nodes
        .iter_mut()
        .find(|spec| spec.name == "app_sink")
        .unwrap();
    app_sink.properties.caps = Some(StreamFormat::new(SampleFormat::F32LE, 48000, 2));

    let mut graph = GraphBuilder::from_description(&description).build().unwrap();
    let (tee, branches) = description.fanout.as_ref().unwrap().resolve(&graph).unwrap();

    let err = FanoutManager::new().attach(&mut graph, tee, &branches).unwrap_err();
    assert_eq!(err.index(), Some(2));
    assert!(graph.request_ports(tee).is_empty());
}
