//! Valid-input gating and passive subscriptions.

use tickgraph_common::{GraphError, ScalarValue};
use tickgraph_types::{int_type, ts, Value};

use super::common::*;
use crate::builder::GraphBuilder;
use crate::engine::{EngineConfig, GraphEngine};
use crate::graph::EvalContext;
use crate::node::{NodeBody, NodeKind, NodeSignature};
use crate::sources::{pull_source_signature, PullSourceBody};

/// A node gated on a valid input skips evaluation until that input has
/// ticked at least once.
#[test]
fn valid_gate_defers_evaluation() {
    let mut b = GraphBuilder::new("gate");
    let fast = b.add_node(
        pull_source_signature("fast", ts(int_type())),
        PullSourceBody::new([(t(0), Value::from(1i64)), (t(20), Value::from(2i64))]),
    );
    let slow = b.add_node(
        pull_source_signature("slow", ts(int_type())),
        PullSourceBody::new([(t(10), Value::from(100i64))]),
    );

    let evals = trace();
    let evals_inner = evals.clone();
    let combiner = b.add_node(
        NodeSignature::new("combine", NodeKind::Sink)
            .with_input("fast", ts(int_type()))
            .with_input("slow", ts(int_type()))
            .with_valid_inputs(&["slow"]),
        move |ctx: &mut EvalContext<'_>| -> Result<(), GraphError> {
            // The gate guarantees `slow` is readable here.
            let s = ctx.input("slow")?.scalar()?.clone();
            evals_inner.lock().unwrap().push((ctx.evaluation_time(), s));
            Ok(())
        },
    );
    b.connect(fast, combiner, "fast").unwrap();
    b.connect(slow, combiner, "slow").unwrap();

    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.run().unwrap();

    // t0 is skipped (slow invalid); t10 and t20 run.
    assert_eq!(
        traced(&evals),
        vec![
            (t(10), ScalarValue::Int(100)),
            (t(20), ScalarValue::Int(100)),
        ]
    );
}

/// Passive inputs are readable but do not wake the node.
#[test]
fn passive_input_does_not_wake_the_node() {
    let mut b = GraphBuilder::new("passive");
    let ticker = b.add_node(
        pull_source_signature("ticker", ts(int_type())),
        PullSourceBody::new([(t(0), Value::from(1i64)), (t(20), Value::from(2i64))]),
    );
    let ambient = b.add_node(
        pull_source_signature("ambient", ts(int_type())),
        PullSourceBody::new([(t(5), Value::from(50i64)), (t(10), Value::from(60i64))]),
    );

    let evals = trace();
    let evals_inner = evals.clone();
    let reader = b.add_node(
        NodeSignature::new("reader", NodeKind::Sink)
            .with_input("trigger", ts(int_type()))
            .with_passive_input("ambient", ts(int_type())),
        move |ctx: &mut EvalContext<'_>| -> Result<(), GraphError> {
            let ambient = ctx.input("ambient")?;
            let latest = if ambient.valid() {
                ambient.scalar()?.clone()
            } else {
                ScalarValue::Int(-1)
            };
            evals_inner
                .lock()
                .unwrap()
                .push((ctx.evaluation_time(), latest));
            Ok(())
        },
    );
    b.connect(ticker, reader, "trigger").unwrap();
    b.connect(ambient, reader, "ambient").unwrap();

    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.run().unwrap();

    // Woken only by the trigger; the passive input is sampled at those
    // instants (invalid at t0, latest value at t20).
    assert_eq!(
        traced(&evals),
        vec![(t(0), ScalarValue::Int(-1)), (t(20), ScalarValue::Int(60))]
    );
}

/// A cycle skipped by the gate consumes only the due scheduler entry;
/// later alarms still fire. The gating input is passive, so nothing but
/// the node's own scheduler can wake it.
#[test]
fn gated_skip_preserves_future_alarms() {
    struct AlarmBody {
        seen: Trace,
    }

    impl NodeBody for AlarmBody {
        fn start(&mut self, ctx: &mut EvalContext<'_>) -> Result<(), GraphError> {
            let scheduler = ctx.scheduler()?;
            scheduler.schedule(t(10), Some("probe"));
            scheduler.schedule(t(30), Some("fire"));
            Ok(())
        }

        fn eval(&mut self, ctx: &mut EvalContext<'_>) -> Result<(), GraphError> {
            let slow = ctx.input("slow")?.scalar()?.clone();
            self.seen
                .lock()
                .unwrap()
                .push((ctx.evaluation_time(), slow));
            ctx.output()?.set_scalar(ScalarValue::Int(1))
        }
    }

    let mut b = GraphBuilder::new("gated-alarm");
    let slow = b.add_node(
        pull_source_signature("slow", ts(int_type())),
        PullSourceBody::new([(t(20), Value::from(100i64))]),
    );
    let seen = trace();
    let alarm = b.add_node(
        NodeSignature::new("alarm", NodeKind::PullSource)
            .with_output(ts(int_type()))
            .with_scheduler()
            .with_passive_input("slow", ts(int_type()))
            .with_valid_inputs(&["slow"]),
        AlarmBody { seen: seen.clone() },
    );
    b.connect(slow, alarm, "slow").unwrap();

    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.run().unwrap();

    // t10 is skipped (slow invalid) and consumed; the t30 alarm survives
    // the skip and runs once the gate is satisfied.
    assert_eq!(traced(&seen), vec![(t(30), ScalarValue::Int(100))]);
}
