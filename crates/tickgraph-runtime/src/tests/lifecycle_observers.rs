//! Observer hook ordering across the engine state machine.

use std::sync::{Arc, Mutex};

use tickgraph_common::ScalarValue;
use tickgraph_types::{int_type, ts};

use super::common::*;
use crate::builder::GraphBuilder;
use crate::engine::{EngineConfig, GraphEngine};
use crate::graph::Graph;
use crate::node::NodeState;
use crate::observer::{LifecycleObserver, ProfileObserver};
use crate::sources::{pull_source_signature, PullSourceBody};
use tickgraph_types::Value;

#[derive(Default)]
struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn push(&self, s: &str) {
        self.events.lock().unwrap().push(s.to_string());
    }
}

impl LifecycleObserver for Recorder {
    fn on_before_start_graph(&mut self, _g: &Graph) {
        self.push("before_start_graph");
    }
    fn on_after_start_graph(&mut self, _g: &Graph) {
        self.push("after_start_graph");
    }
    fn on_before_start_node(&mut self, _g: &Graph, _n: u32) {
        self.push("before_start_node");
    }
    fn on_after_start_node(&mut self, _g: &Graph, _n: u32) {
        self.push("after_start_node");
    }
    fn on_before_graph_evaluation(&mut self, _g: &Graph) {
        self.push("before_graph_evaluation");
    }
    fn on_after_graph_evaluation(&mut self, _g: &Graph) {
        self.push("after_graph_evaluation");
    }
    fn on_before_node_evaluation(&mut self, _g: &Graph, _n: u32) {
        self.push("before_node_evaluation");
    }
    fn on_after_node_evaluation(&mut self, _g: &Graph, _n: u32) {
        self.push("after_node_evaluation");
    }
    fn on_after_graph_push_nodes_evaluation(&mut self, _g: &Graph) {
        self.push("after_graph_push_nodes_evaluation");
    }
    fn on_before_stop_node(&mut self, _g: &Graph, _n: u32) {
        self.push("before_stop_node");
    }
    fn on_after_stop_node(&mut self, _g: &Graph, _n: u32) {
        self.push("after_stop_node");
    }
    fn on_before_stop_graph(&mut self, _g: &Graph) {
        self.push("before_stop_graph");
    }
    fn on_after_stop_graph(&mut self, _g: &Graph) {
        self.push("after_stop_graph");
    }
}

#[test]
fn hooks_fire_in_lifecycle_order() {
    let events = Arc::new(Mutex::new(Vec::new()));

    let mut b = GraphBuilder::new("observed");
    b.add_node(
        script_source("src", ts(int_type())),
        ScriptBody::new().at(t(0), |ctx| ctx.output()?.set_scalar(ScalarValue::Int(1))),
    );
    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.add_observer(Box::new(Recorder {
        events: events.clone(),
    }));
    engine.run().unwrap();

    let seen = events.lock().unwrap().clone();
    let expected = vec![
        "before_start_graph",
        "before_start_node",
        "after_start_node",
        "after_start_graph",
        "before_graph_evaluation",
        "after_graph_push_nodes_evaluation",
        "before_node_evaluation",
        "after_node_evaluation",
        "after_graph_evaluation",
        "before_stop_graph",
        "before_stop_node",
        "after_stop_node",
        "after_stop_graph",
    ];
    assert_eq!(seen, expected);
}

#[test]
fn observers_run_in_registration_order() {
    let events = Arc::new(Mutex::new(Vec::new()));

    struct Tagged {
        tag: &'static str,
        events: Arc<Mutex<Vec<String>>>,
    }
    impl LifecycleObserver for Tagged {
        fn on_before_start_graph(&mut self, _g: &Graph) {
            self.events.lock().unwrap().push(self.tag.to_string());
        }
    }

    let mut b = GraphBuilder::new("ordered");
    b.add_node(
        script_source("src", ts(int_type())),
        ScriptBody::new().at(t(0), |ctx| ctx.output()?.set_scalar(ScalarValue::Int(1))),
    );
    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.add_observer(Box::new(Tagged { tag: "first", events: events.clone() }));
    engine.add_observer(Box::new(Tagged { tag: "second", events: events.clone() }));
    engine.start().unwrap();

    assert_eq!(*events.lock().unwrap(), vec!["first", "second"]);
}

#[test]
fn profiler_counts_evaluations() {
    let mut b = GraphBuilder::new("profiled");
    let src = b.add_node(
        script_source("src", ts(int_type())),
        ScriptBody::new()
            .at(t(0), |ctx| ctx.output()?.set_scalar(ScalarValue::Int(1)))
            .at(t(10), |ctx| ctx.output()?.set_scalar(ScalarValue::Int(2))),
    );
    let profiler = Arc::new(Mutex::new(ProfileObserver::new()));
    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.add_observer(Box::new(profiler.clone()));
    engine.run().unwrap();

    let profiler = profiler.lock().unwrap();
    assert_eq!(profiler.profile(src.0).unwrap().evaluations, 2);
    assert_eq!(profiler.cycles(), 2);
}

#[test]
fn dispose_tears_nodes_down_after_stop() {
    let mut b = GraphBuilder::new("disposable");
    let src = b.add_node(
        pull_source_signature("ticks", ts(int_type())),
        PullSourceBody::new([(t(0), Value::from(1i64))]),
    );
    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.run().unwrap();
    assert_eq!(engine.graph().node(src.0).unwrap().state(), NodeState::Stopped);

    engine.dispose().unwrap();
    assert_eq!(engine.graph().node(src.0).unwrap().state(), NodeState::Disposed);
    // Disposing twice is a no-op.
    engine.dispose().unwrap();
    assert_eq!(engine.graph().node(src.0).unwrap().state(), NodeState::Disposed);
}

#[test]
fn dispose_stops_a_running_engine_first() {
    let mut b = GraphBuilder::new("dispose-stop");
    let src = b.add_node(
        pull_source_signature("ticks", ts(int_type())),
        PullSourceBody::new([(t(0), Value::from(1i64))]),
    );
    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.start().unwrap();
    engine.dispose().unwrap();
    assert_eq!(engine.graph().node(src.0).unwrap().state(), NodeState::Disposed);
    // A disposed engine does not restart its stop sequence.
    engine.stop().unwrap();
    assert_eq!(engine.graph().node(src.0).unwrap().state(), NodeState::Disposed);
}
