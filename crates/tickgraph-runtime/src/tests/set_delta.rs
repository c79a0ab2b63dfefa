//! Tracked-set delta semantics, including the cancellation rules.

use tickgraph_common::{GraphError, ScalarValue};
use tickgraph_types::{int_type, tss, DeltaValue};

use super::common::*;
use crate::builder::GraphBuilder;
use crate::engine::{EngineConfig, GraphEngine};
use crate::graph::EvalContext;
use crate::node::{NodeKind, NodeSignature};

fn int(v: i64) -> ScalarValue {
    ScalarValue::Int(v)
}

#[test]
fn add_then_erase_cancels_within_a_cycle() {
    let meta = tss(int_type()).unwrap();
    let mut b = GraphBuilder::new("tss");
    let src = b.add_node(
        script_source("src", meta),
        ScriptBody::new().at(t(0), |ctx| {
            let mut out = ctx.output()?;
            out.insert(int(1))?;
            out.insert(int(2))?;
            out.insert(int(3))?;
            out.remove(&int(2))?;
            Ok(())
        }),
    );
    // The subscriber observes the net delta during the cycle.
    let observed = trace();
    let observed_inner = observed.clone();
    let sink = b.add_node(
        NodeSignature::new("observer", NodeKind::Sink).with_input("in", meta),
        move |ctx: &mut EvalContext<'_>| -> Result<(), GraphError> {
            let input = ctx.input("in")?;
            let view = input.view()?;
            match view.delta_value() {
                DeltaValue::Keyed { added, removed, updated, cleared } => {
                    assert!(!cleared);
                    assert!(removed.is_empty());
                    assert!(updated.is_empty());
                    let mut added: Vec<i64> = added
                        .iter()
                        .map(|v| match v {
                            ScalarValue::Int(i) => *i,
                            _ => unreachable!(),
                        })
                        .collect();
                    added.sort_unstable();
                    assert_eq!(added, vec![1, 3]);
                }
                other => panic!("unexpected delta {other:?}"),
            }
            assert_eq!(view.set_len()?, 2);
            observed_inner
                .lock()
                .unwrap()
                .push((ctx.evaluation_time(), int(view.set_len()? as i64)));
            Ok(())
        },
    );
    b.connect(src, sink, "in").unwrap();

    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.run().unwrap();

    assert_eq!(traced(&observed), vec![(t(0), int(2))]);

    // Post-cycle: the set holds {1, 3} and the delta is still readable.
    let view = engine.graph().node_output_view(src.0, t(0)).unwrap();
    assert_eq!(view.set_len().unwrap(), 2);
    assert!(view.set_contains(&int(1)).unwrap());
    assert!(!view.set_contains(&int(2)).unwrap());
    assert!(view.was_added(&int(1)).unwrap());
    assert!(view.was_added(&int(3)).unwrap());
    assert!(!view.was_removed(&int(2)).unwrap());
}

#[test]
fn remove_then_add_reads_as_update() {
    let meta = tss(int_type()).unwrap();
    let mut b = GraphBuilder::new("tss-update");
    let src = b.add_node(
        script_source("src", meta),
        ScriptBody::new()
            .at(t(0), |ctx| {
                ctx.output()?.insert(int(9))?;
                Ok(())
            })
            .at(t(10), |ctx| {
                let mut out = ctx.output()?;
                out.remove(&int(9))?;
                out.insert(int(9))?;
                Ok(())
            }),
    );
    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.run().unwrap();

    let view = engine.graph().node_output_view(src.0, t(10)).unwrap();
    match view.delta_value() {
        DeltaValue::Keyed { added, removed, updated, .. } => {
            assert!(added.is_empty());
            assert!(removed.is_empty());
            assert_eq!(updated, vec![&int(9)]);
        }
        other => panic!("unexpected delta {other:?}"),
    }
    assert_eq!(view.set_len().unwrap(), 1);
}

#[test]
fn clear_sets_flag_and_replays_erases() {
    let meta = tss(int_type()).unwrap();
    let mut b = GraphBuilder::new("tss-clear");
    let src = b.add_node(
        script_source("src", meta),
        ScriptBody::new()
            .at(t(0), |ctx| {
                let mut out = ctx.output()?;
                out.insert(int(1))?;
                out.insert(int(2))?;
                Ok(())
            })
            .at(t(10), |ctx| {
                ctx.output()?.clear()?;
                Ok(())
            }),
    );
    let cleared_seen = trace();
    let cleared_inner = cleared_seen.clone();
    let sink = b.add_node(
        NodeSignature::new("observer", NodeKind::Sink).with_input("in", meta),
        move |ctx: &mut EvalContext<'_>| -> Result<(), GraphError> {
            if ctx.evaluation_time() != t(10) {
                return Ok(());
            }
            let view = ctx.input("in")?.view()?;
            match view.delta_value() {
                DeltaValue::Keyed { removed, cleared, .. } => {
                    assert!(cleared);
                    assert_eq!(removed.len(), 2);
                }
                other => panic!("unexpected delta {other:?}"),
            }
            cleared_inner
                .lock()
                .unwrap()
                .push((ctx.evaluation_time(), ScalarValue::Bool(true)));
            Ok(())
        },
    );
    b.connect(src, sink, "in").unwrap();

    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.run().unwrap();
    assert_eq!(traced(&cleared_seen).len(), 1);

    let view = engine.graph().node_output_view(src.0, t(10)).unwrap();
    assert_eq!(view.set_len().unwrap(), 0);
    // Valid: the set ticked, even though it is now empty.
    assert!(view.valid());
}

#[test]
fn empty_set_is_invalid_until_first_tick() {
    let meta = tss(int_type()).unwrap();
    let mut b = GraphBuilder::new("tss-empty");
    let src = b.add_node(
        script_source("src", meta),
        ScriptBody::new().at(t(5), |ctx| {
            // An explicit empty tick: clear on an empty set.
            ctx.output()?.clear()?;
            Ok(())
        }),
    );
    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.start().unwrap();
    let before = engine.graph().node_output_view(src.0, t(0)).unwrap();
    assert_eq!(before.set_len().unwrap(), 0);
    assert!(!before.valid());
    engine.run().unwrap();
    let after = engine.graph().node_output_view(src.0, t(5)).unwrap();
    assert!(after.valid());
    assert_eq!(after.set_len().unwrap(), 0);
}
