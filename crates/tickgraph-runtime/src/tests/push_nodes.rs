//! Push sources: inbox routing, ordering, and one-value-per-cycle drain.

use tickgraph_common::ScalarValue;
use tickgraph_types::{int_type, ts, Value};

use super::common::*;
use crate::builder::GraphBuilder;
use crate::engine::{EngineConfig, GraphEngine};
use crate::sources::{push_source_signature, PushSourceBody};

#[test]
fn queued_arrivals_apply_one_per_cycle_in_order() {
    let mut b = GraphBuilder::new("push");
    let src = b.add_node(push_source_signature("feed", ts(int_type())), PushSourceBody);
    let seen = trace();
    let (sink_sig, sink_body) = capture_sink(ts(int_type()), seen.clone());
    let sink = b.add_node(sink_sig, sink_body);
    b.connect(src, sink, "in").unwrap();

    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    let sender = engine.push_sender(src).unwrap();
    sender.send(Value::from(1i64)).unwrap();
    sender.send(Value::from(2i64)).unwrap();
    sender.send(Value::from(3i64)).unwrap();

    engine.run().unwrap();

    let ticks = traced(&seen);
    let values: Vec<&ScalarValue> = ticks.iter().map(|(_, v)| v).collect();
    assert_eq!(
        values,
        vec![&ScalarValue::Int(1), &ScalarValue::Int(2), &ScalarValue::Int(3)]
    );
    // One value per cycle: strictly increasing cycle times.
    assert!(ticks.windows(2).all(|w| w[0].0 < w[1].0));
}

#[test]
fn senders_attach_to_push_nodes_only() {
    let mut b = GraphBuilder::new("push-validate");
    let pull = b.add_node(
        script_source("pull", ts(int_type())),
        ScriptBody::new().at(t(0), |ctx| ctx.output()?.set_scalar(ScalarValue::Int(0))),
    );
    let engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    assert!(engine.push_sender(pull).is_err());
}

#[test]
fn cross_thread_arrivals_become_visible_at_cycle_start() {
    let mut b = GraphBuilder::new("push-thread");
    let src = b.add_node(push_source_signature("feed", ts(int_type())), PushSourceBody);
    let seen = trace();
    let (sink_sig, sink_body) = capture_sink(ts(int_type()), seen.clone());
    let sink = b.add_node(sink_sig, sink_body);
    b.connect(src, sink, "in").unwrap();

    let mut engine = GraphEngine::new(b.build().unwrap(), EngineConfig::default());
    let sender = engine.push_sender(src).unwrap();
    let producer = std::thread::spawn(move || {
        for i in 0..5 {
            sender.send(Value::from(i as i64)).unwrap();
        }
    });
    producer.join().unwrap();

    engine.run().unwrap();
    assert_eq!(traced(&seen).len(), 5);
}
