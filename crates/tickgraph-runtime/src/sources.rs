//! Built-in source node bodies.

use std::collections::VecDeque;

use tickgraph_common::{EngineTime, GraphError};
use tickgraph_types::{TsMeta, Value};

use crate::graph::EvalContext;
use crate::node::{NodeBody, NodeKind, NodeSignature};

const EMIT_TAG: &str = "emit";

/// Pull source: replays an ordered queue of `(time, value)` events. The
/// value whose time equals the evaluation time is applied to the output;
/// the node then schedules itself for the next queued time.
pub struct PullSourceBody {
    events: VecDeque<(EngineTime, Value)>,
}

impl PullSourceBody {
    pub fn new(events: impl IntoIterator<Item = (EngineTime, Value)>) -> Self {
        let mut events: Vec<(EngineTime, Value)> = events.into_iter().collect();
        events.sort_by_key(|(t, _)| *t);
        Self {
            events: events.into(),
        }
    }

    fn schedule_next(&self, ctx: &mut EvalContext<'_>) -> Result<(), GraphError> {
        if let Some((t, _)) = self.events.front() {
            let t = *t;
            ctx.schedule(t, Some(EMIT_TAG))?;
        }
        Ok(())
    }
}

impl NodeBody for PullSourceBody {
    fn start(&mut self, ctx: &mut EvalContext<'_>) -> Result<(), GraphError> {
        self.schedule_next(ctx)
    }

    fn eval(&mut self, ctx: &mut EvalContext<'_>) -> Result<(), GraphError> {
        let t = ctx.evaluation_time();
        while self.events.front().map(|(et, _)| *et == t).unwrap_or(false) {
            let (_, value) = self.events.pop_front().expect("checked front");
            ctx.output()?.set_value(&value)?;
        }
        // Anything earlier than the evaluation time was missed; drop it
        // rather than emit stale data.
        while self.events.front().map(|(et, _)| *et < t).unwrap_or(false) {
            self.events.pop_front();
        }
        self.schedule_next(ctx)
    }

    fn dispose(&mut self, _ctx: &mut EvalContext<'_>) -> Result<(), GraphError> {
        self.events.clear();
        Ok(())
    }
}

/// Push source: applies one queued inbox value per cycle, requesting an
/// immediate follow-up cycle while more remain so arrival order is
/// preserved one tick apart.
pub struct PushSourceBody;

impl NodeBody for PushSourceBody {
    fn eval(&mut self, ctx: &mut EvalContext<'_>) -> Result<(), GraphError> {
        if let Some(value) = ctx.pop_push_value() {
            ctx.output()?.set_value(&value)?;
        }
        if ctx.pending_push_count() > 0 {
            ctx.notify_next_cycle();
        }
        Ok(())
    }
}

/// Signature for a pull source emitting the given series shape. The
/// scheduler is implied; pull sources drive themselves.
pub fn pull_source_signature(name: impl Into<String>, output: &'static TsMeta) -> NodeSignature {
    NodeSignature::new(name, NodeKind::PullSource)
        .with_output(output)
        .with_scheduler()
}

/// Signature for a push source fed from the engine's inbox.
pub fn push_source_signature(name: impl Into<String>, output: &'static TsMeta) -> NodeSignature {
    NodeSignature::new(name, NodeKind::PushSource).with_output(output)
}
