//! Shared helpers for the runtime scenario tests.

use std::sync::{Arc, Mutex};

use tickgraph_common::{EngineTime, GraphError, ScalarValue};
use tickgraph_types::TsMeta;

use crate::graph::EvalContext;
use crate::node::{NodeBody, NodeKind, NodeSignature};

pub fn t(us: i64) -> EngineTime {
    EngineTime::from_micros(us)
}

/// Captured `(time, value)` ticks from a sink.
pub type Trace = Arc<Mutex<Vec<(EngineTime, ScalarValue)>>>;

pub fn trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn traced(trace: &Trace) -> Vec<(EngineTime, ScalarValue)> {
    trace.lock().unwrap().clone()
}

/// A sink that records its input's scalar value whenever it ticks.
pub fn capture_sink(
    input_meta: &'static TsMeta,
    trace: Trace,
) -> (NodeSignature, impl NodeBody + 'static) {
    let signature =
        NodeSignature::new("capture", NodeKind::Sink).with_input("in", input_meta);
    let body = move |ctx: &mut EvalContext<'_>| -> Result<(), GraphError> {
        let input = ctx.input("in")?;
        if input.modified() {
            let value = input.scalar()?.clone();
            trace.lock().unwrap().push((ctx.evaluation_time(), value));
        }
        Ok(())
    };
    (signature, body)
}

type StepFn = Box<dyn FnMut(&mut EvalContext<'_>) -> Result<(), GraphError>>;

/// A pull-style source driven by a script of timed steps. Each step runs in
/// the cycle whose evaluation time matches.
pub struct ScriptBody {
    steps: Vec<(EngineTime, StepFn)>,
}

impl ScriptBody {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn at(
        mut self,
        when: EngineTime,
        step: impl FnMut(&mut EvalContext<'_>) -> Result<(), GraphError> + 'static,
    ) -> Self {
        self.steps.push((when, Box::new(step)));
        self
    }
}

impl NodeBody for ScriptBody {
    fn start(&mut self, ctx: &mut EvalContext<'_>) -> Result<(), GraphError> {
        let times: Vec<EngineTime> = self.steps.iter().map(|(t, _)| *t).collect();
        let scheduler = ctx.scheduler()?;
        for t in times {
            scheduler.schedule(t, None);
        }
        Ok(())
    }

    fn eval(&mut self, ctx: &mut EvalContext<'_>) -> Result<(), GraphError> {
        let now = ctx.evaluation_time();
        for (when, step) in &mut self.steps {
            if *when == now {
                step(ctx)?;
            }
        }
        Ok(())
    }
}

/// Signature for a scripted source with the given output shape.
pub fn script_source(name: &str, output: &'static TsMeta) -> NodeSignature {
    NodeSignature::new(name, NodeKind::PullSource)
        .with_output(output)
        .with_scheduler()
}
