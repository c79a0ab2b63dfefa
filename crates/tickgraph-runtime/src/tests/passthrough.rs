//! Two-node pass-through pipelines driven by a pull source.

use tickgraph_common::{GraphError, ScalarValue};
use tickgraph_types::{int_type, ts, Value};

use super::common::*;
use crate::builder::GraphBuilder;
use crate::engine::{EngineConfig, GraphEngine};
use crate::graph::EvalContext;
use crate::node::{NodeKind, NodeSignature};
use crate::sources::{pull_source_signature, PullSourceBody};

#[test]
fn pull_source_feeds_compute_in_order() {
    let mut b = GraphBuilder::new("passthrough");
    let src = b.add_node(
        pull_source_signature("ticks", ts(int_type())),
        PullSourceBody::new([
            (t(0), Value::from(10i64)),
            (t(1_000), Value::from(20i64)),
            (t(2_000), Value::from(30i64)),
        ]),
    );
    let add_one = b.add_node(
        NodeSignature::new("add_one", NodeKind::Compute)
            .with_input("in", ts(int_type()))
            .with_output(ts(int_type())),
        |ctx: &mut EvalContext<'_>| -> Result<(), GraphError> {
            let v = match ctx.input("in")?.scalar()? {
                ScalarValue::Int(i) => *i,
                other => panic!("unexpected input {other}"),
            };
            ctx.output()?.set_scalar(ScalarValue::Int(v + 1))
        },
    );
    let out_trace = trace();
    let (sink_sig, sink_body) = capture_sink(ts(int_type()), out_trace.clone());
    let sink = b.add_node(sink_sig, sink_body);

    b.connect(src, add_one, "in").unwrap();
    b.connect(add_one, sink, "in").unwrap();

    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.run().unwrap();

    assert_eq!(
        traced(&out_trace),
        vec![
            (t(0), ScalarValue::Int(11)),
            (t(1_000), ScalarValue::Int(21)),
            (t(2_000), ScalarValue::Int(31)),
        ]
    );

    // The compute output's timestamp is the last emission time, and it is
    // not marked modified at any other instant.
    let view = engine.graph().node_output_view(add_one.0, t(2_000)).unwrap();
    assert!(view.modified());
    assert_eq!(view.last_modified_time(), t(2_000));
    let earlier = engine.graph().node_output_view(add_one.0, t(1_500)).unwrap();
    assert!(!earlier.modified());
}

#[test]
fn setting_the_same_value_twice_notifies_once() {
    let mut b = GraphBuilder::new("dedup");
    let src = b.add_node(
        script_source("src", ts(int_type())),
        ScriptBody::new().at(t(0), |ctx| {
            ctx.output()?.set_scalar(ScalarValue::Int(5))?;
            ctx.output()?.set_scalar(ScalarValue::Int(5))
        }),
    );
    let evals = trace();
    let evals_in_sink = evals.clone();
    let sink = b.add_node(
        NodeSignature::new("count", NodeKind::Sink).with_input("in", ts(int_type())),
        move |ctx: &mut EvalContext<'_>| -> Result<(), GraphError> {
            let v = ctx.input("in")?.scalar()?.clone();
            evals_in_sink
                .lock()
                .unwrap()
                .push((ctx.evaluation_time(), v));
            Ok(())
        },
    );
    b.connect(src, sink, "in").unwrap();

    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.run().unwrap();

    // Two writes in one cycle, one evaluation of the subscriber.
    assert_eq!(traced(&evals), vec![(t(0), ScalarValue::Int(5))]);
}

#[test]
fn unwired_input_reads_as_invalid() {
    let mut b = GraphBuilder::new("unwired");
    let seen = trace();
    let seen_inner = seen.clone();
    b.add_node(
        script_source("probe", ts(int_type())).with_input("maybe", ts(int_type())),
        ScriptBody::new().at(t(0), move |ctx| {
            let input = ctx.input("maybe")?;
            assert!(!input.valid());
            assert!(!input.modified());
            assert!(input.view().is_err());
            seen_inner
                .lock()
                .unwrap()
                .push((ctx.evaluation_time(), ScalarValue::Bool(true)));
            ctx.output()?.set_scalar(ScalarValue::Int(0))
        }),
    );
    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.run().unwrap();
    assert_eq!(traced(&seen).len(), 1);
}
