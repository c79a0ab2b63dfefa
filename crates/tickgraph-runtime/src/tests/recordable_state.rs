//! Recordable-state outputs: allocated alongside the primary output and
//! written through the evaluation context.

use tickgraph_common::ScalarValue;
use tickgraph_types::{float_type, int_type, ts, tsb};

use super::common::*;
use crate::builder::GraphBuilder;
use crate::engine::{EngineConfig, GraphEngine};

#[test]
fn state_output_tracks_writes() {
    let state_meta = tsb(vec![
        ("count".to_string(), ts(int_type())),
        ("ewma".to_string(), ts(float_type())),
    ]);
    let mut b = GraphBuilder::new("recordable");
    let node = b.add_node(
        script_source("accumulator", ts(int_type()))
            .with_recordable_state(state_meta, "accumulator-v1"),
        ScriptBody::new()
            .at(t(0), |ctx| {
                ctx.output()?.set_scalar(ScalarValue::Int(1))?;
                let mut state = ctx.recordable_state()?;
                state.at_field("count")?.set_scalar(ScalarValue::Int(1))
            })
            .at(t(10), |ctx| {
                ctx.output()?.set_scalar(ScalarValue::Int(2))?;
                let mut state = ctx.recordable_state()?;
                state.at_field("count")?.set_scalar(ScalarValue::Int(2))
            }),
    );
    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.run().unwrap();

    let graph = engine.graph();
    let n = graph.node(node.0).unwrap();
    assert!(n.signature().is_recordable());
    let key = n.recordable_state().expect("state output allocated");
    let state = graph.output_view(key, t(10)).unwrap();
    assert!(state.valid());
    assert_eq!(state.last_modified_time(), t(10));
    assert_eq!(
        state.field("count").unwrap().scalar().unwrap(),
        &ScalarValue::Int(2)
    );
    // The untouched field never became valid; a persistence collaborator
    // observes exactly what the node wrote.
    assert!(!state.field("ewma").unwrap().valid());
}

#[test]
fn nodes_without_the_flag_get_no_state_output() {
    let mut b = GraphBuilder::new("stateless");
    let node = b.add_node(
        script_source("plain", ts(int_type())),
        ScriptBody::new().at(t(0), |ctx| {
            assert!(ctx.recordable_state().is_err());
            ctx.output()?.set_scalar(ScalarValue::Int(0))
        }),
    );
    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.run().unwrap();
    assert!(engine.graph().node(node.0).unwrap().recordable_state().is_none());
}
