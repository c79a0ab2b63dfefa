//! Reference outputs: transparent dereference, rebinds and sampling.

use tickgraph_common::{GraphError, ScalarValue};
use tickgraph_types::{int_type, ts, ts_ref, OutputKey, RefValue, Value};

use super::common::*;
use crate::builder::GraphBuilder;
use crate::engine::{EngineConfig, GraphEngine};
use crate::graph::EvalContext;
use crate::node::{NodeKind, NodeSignature};
use crate::sources::{pull_source_signature, PullSourceBody};

/// S3 shape: a reference output X switches between concrete outputs Y and
/// Z; the subscriber follows the reference, not the abandoned target.
#[test]
fn rebinding_a_reference_switches_the_subscription() {
    let int_series = ts(int_type());
    let ref_series = ts_ref(int_series);

    let mut b = GraphBuilder::new("ref-rebind");
    // Node 0 -> output key 0, node 1 -> output key 1 (one output each).
    let y = b.add_node(
        pull_source_signature("y", int_series),
        PullSourceBody::new([(t(0), Value::from(5i64)), (t(2_000), Value::from(6i64))]),
    );
    let z = b.add_node(
        pull_source_signature("z", int_series),
        PullSourceBody::new([(t(0), Value::from(7i64))]),
    );
    let x = b.add_node(
        script_source("x", ref_series),
        ScriptBody::new()
            .at(t(0), |ctx| {
                ctx.output()?.set_ref(RefValue::peered(OutputKey(0)))
            })
            .at(t(1_000), |ctx| {
                ctx.output()?.set_ref(RefValue::peered(OutputKey(1)))
            })
            // Same-target rebind: must not re-fire the subscriber.
            .at(t(3_000), |ctx| {
                ctx.output()?.set_ref(RefValue::peered(OutputKey(1)))
            }),
    );

    let seen = trace();
    let (sink_sig, sink_body) = capture_sink(int_series, seen.clone());
    let n = b.add_node(sink_sig, sink_body);
    b.connect(x, n, "in").unwrap();

    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.run().unwrap();

    // t0: X -> Y (5). t1ms: X -> Z (7). t2ms: Y changes to 6 but X points
    // at Z, so the subscriber stays silent. t3ms: no-op rebind.
    assert_eq!(
        traced(&seen),
        vec![(t(0), ScalarValue::Int(5)), (t(1_000), ScalarValue::Int(7))]
    );
}

/// A change of the underlying output propagates while the reference points
/// at it.
#[test]
fn dereferenced_target_changes_propagate() {
    let int_series = ts(int_type());
    let ref_series = ts_ref(int_series);

    let mut b = GraphBuilder::new("ref-follow");
    let _y = b.add_node(
        pull_source_signature("y", int_series),
        PullSourceBody::new([
            (t(0), Value::from(1i64)),
            (t(500), Value::from(2i64)),
            (t(900), Value::from(3i64)),
        ]),
    );
    let x = b.add_node(
        script_source("x", ref_series),
        ScriptBody::new().at(t(0), |ctx| {
            ctx.output()?.set_ref(RefValue::peered(OutputKey(0)))
        }),
    );
    let seen = trace();
    let (sink_sig, sink_body) = capture_sink(int_series, seen.clone());
    let n = b.add_node(sink_sig, sink_body);
    b.connect(x, n, "in").unwrap();

    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.run().unwrap();

    assert_eq!(
        traced(&seen),
        vec![
            (t(0), ScalarValue::Int(1)),
            (t(500), ScalarValue::Int(2)),
            (t(900), ScalarValue::Int(3)),
        ]
    );
}

/// A reference input peered to a concrete output samples once at the
/// binding tick and stays silent afterwards.
#[test]
fn reference_input_notifies_once() {
    let int_series = ts(int_type());
    let ref_input = ts_ref(int_series);

    let mut b = GraphBuilder::new("ref-sample");
    let y = b.add_node(
        pull_source_signature("y", int_series),
        PullSourceBody::new([
            (t(0), Value::from(10i64)),
            (t(1_000), Value::from(20i64)),
            (t(2_000), Value::from(30i64)),
        ]),
    );
    let fired = trace();
    let fired_inner = fired.clone();
    let sampler = b.add_node(
        NodeSignature::new("sampler", NodeKind::Sink).with_input("r", ref_input),
        move |ctx: &mut EvalContext<'_>| -> Result<(), GraphError> {
            let input = ctx.input("r")?;
            if input.modified() {
                // The reference dereferences to the live output value.
                let v = input.view()?.scalar()?.clone();
                fired_inner.lock().unwrap().push((ctx.evaluation_time(), v));
            }
            Ok(())
        },
    );
    b.connect(y, sampler, "r").unwrap();

    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.run().unwrap();

    // Only the binding tick (the start cycle) fires, even though the
    // underlying output keeps changing.
    let fired = traced(&fired);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].0, t(0));
}
