//! Window outputs: tick-bounded and duration-bounded eviction.

use tickgraph_common::{EngineTimeDelta, ScalarValue};
use tickgraph_types::{int_type, tsw_duration, tsw_ticks};

use super::common::*;
use crate::builder::GraphBuilder;
use crate::engine::{EngineConfig, GraphEngine};

fn int(v: i64) -> ScalarValue {
    ScalarValue::Int(v)
}

#[test]
fn fixed_window_evicts_exactly_one_per_overflow_push() {
    let meta = tsw_ticks(int_type(), 3).unwrap();
    let mut b = GraphBuilder::new("window");
    let src = b.add_node(
        script_source("src", meta),
        ScriptBody::new()
            .at(t(0), |ctx| ctx.output()?.push(int(10)))
            .at(t(1), |ctx| ctx.output()?.push(int(20)))
            .at(t(2), |ctx| ctx.output()?.push(int(30)))
            .at(t(3), |ctx| ctx.output()?.push(int(40))),
    );
    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.run().unwrap();

    let view = engine.graph().node_output_view(src.0, t(3)).unwrap();
    assert_eq!(view.window_values().unwrap(), &[int(20), int(30), int(40)]);
    assert_eq!(view.window_len().unwrap(), 3);
    assert!(view.has_removed_value().unwrap());
    assert_eq!(view.removed_value_count().unwrap(), 1);
    assert_eq!(view.removed_values().unwrap(), vec![&int(10)]);
    assert!(view.modified());
    // Element navigation is oldest-first, timestamps parallel.
    assert_eq!(view.element(0).unwrap(), &int(20));
    assert_eq!(view.value_times().unwrap(), &[t(1), t(2), t(3)]);
    assert_eq!(view.first_modified_time().unwrap(), Some(t(1)));
}

#[test]
fn duration_window_with_zero_elapsed_never_evicts() {
    let meta = tsw_duration(int_type(), EngineTimeDelta::from_micros(100)).unwrap();
    let mut b = GraphBuilder::new("window-duration");
    let src = b.add_node(
        script_source("src", meta),
        ScriptBody::new().at(t(0), |ctx| {
            let mut out = ctx.output()?;
            out.push(int(1))?;
            out.push(int(2))?;
            out.push(int(3))?;
            Ok(())
        }),
    );
    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.run().unwrap();

    let view = engine.graph().node_output_view(src.0, t(0)).unwrap();
    assert_eq!(view.window_len().unwrap(), 3);
    assert!(!view.has_removed_value().unwrap());
}

#[test]
fn duration_window_evicts_stale_tail() {
    let meta = tsw_duration(int_type(), EngineTimeDelta::from_micros(100)).unwrap();
    let mut b = GraphBuilder::new("window-stale");
    let src = b.add_node(
        script_source("src", meta),
        ScriptBody::new()
            .at(t(0), |ctx| ctx.output()?.push(int(1)))
            .at(t(50), |ctx| ctx.output()?.push(int(2)))
            .at(t(200), |ctx| ctx.output()?.push(int(3))),
    );
    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.run().unwrap();

    let view = engine.graph().node_output_view(src.0, t(200)).unwrap();
    // Entries stamped 0 and 50 are both older than 100us at t=200.
    assert_eq!(view.window_values().unwrap(), &[int(3)]);
    assert_eq!(view.removed_value_count().unwrap(), 2);
}
