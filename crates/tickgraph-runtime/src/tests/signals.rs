//! SIGNAL inputs: tick visibility without value access.

use tickgraph_common::{GraphError, GraphErrorKind, ScalarValue};
use tickgraph_types::{int_type, signal, ts, tss};

use super::common::*;
use crate::builder::GraphBuilder;
use crate::engine::{EngineConfig, GraphEngine};
use crate::graph::EvalContext;
use crate::node::{NodeKind, NodeSignature};

#[test]
fn any_output_shape_binds_to_a_signal_input() {
    let mut b = GraphBuilder::new("signal");
    let scalar_src = b.add_node(
        script_source("scalar", ts(int_type())),
        ScriptBody::new().at(t(0), |ctx| ctx.output()?.set_scalar(ScalarValue::Int(1))),
    );
    let set_src = b.add_node(
        script_source("set", tss(int_type()).unwrap()),
        ScriptBody::new().at(t(5), |ctx| {
            ctx.output()?.insert(ScalarValue::Int(7))?;
            Ok(())
        }),
    );

    let ticks = trace();
    let ticks_inner = ticks.clone();
    let listener = b.add_node(
        NodeSignature::new("listener", NodeKind::Sink)
            .with_input("a", signal())
            .with_input("b", signal()),
        move |ctx: &mut EvalContext<'_>| -> Result<(), GraphError> {
            let a = ctx.input("a")?;
            let b = ctx.input("b")?;
            // Signals expose tick state, never values.
            assert_eq!(a.view().unwrap_err().kind, GraphErrorKind::NotCapable);
            let which = match (a.modified(), b.modified()) {
                (true, false) => 0,
                (false, true) => 1,
                (true, true) => 2,
                (false, false) => 3,
            };
            ticks_inner
                .lock()
                .unwrap()
                .push((ctx.evaluation_time(), ScalarValue::Int(which)));
            Ok(())
        },
    );
    b.connect(scalar_src, listener, "a").unwrap();
    b.connect(set_src, listener, "b").unwrap();

    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    engine.run().unwrap();

    assert_eq!(
        traced(&ticks),
        vec![(t(0), ScalarValue::Int(0)), (t(5), ScalarValue::Int(1))]
    );
}
