//! The engine loop: start / evaluate / stop over one graph.
//!
//! Single-threaded cooperative: one loop owns the arena and mutates all
//! value and overlay state. Within a cycle nothing blocks; the only
//! suspension point is between cycles, where a real-time engine waits on
//! the push inbox's condition variable until the next scheduled time or an
//! arrival, whichever comes first.

use std::sync::Arc;

use tickgraph_common::{
    EngineTime, EngineTimeDelta, GraphError, GraphErrorKind, ScalarValue, MAX_DT, MIN_DT,
};

use crate::builder::NodeHandle;
use crate::clock::{wall_now, EngineClock, EvaluationClock, EvaluationMode};
use crate::graph::{split_outputs, EngineShared, EvalContext, Graph, OutputsView, MIN_TD};
use crate::node::{NodeKind, NodeState};
use crate::observer::LifecycleObserver;
use crate::push::{PushInbox, PushSender};

/// Engine configuration, builder style.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: EvaluationMode,
    pub start_time: EngineTime,
    /// Exclusive horizon; cycles at or past it do not run.
    pub end_time: EngineTime,
    /// Idle poll granularity for real-time waits with no scheduled work.
    pub idle_wait: EngineTimeDelta,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: EvaluationMode::Simulation,
            start_time: EngineTime::from_micros(0),
            end_time: MAX_DT,
            idle_wait: EngineTimeDelta::from_millis(20),
        }
    }
}

impl EngineConfig {
    #[inline]
    pub fn with_mode(mut self, mode: EvaluationMode) -> Self {
        self.mode = mode;
        self
    }

    #[inline]
    pub fn with_start_time(mut self, t: EngineTime) -> Self {
        self.start_time = t;
        self
    }

    #[inline]
    pub fn with_end_time(mut self, t: EngineTime) -> Self {
        self.end_time = t;
        self
    }

    #[inline]
    pub fn realtime(self) -> Self {
        self.with_mode(EvaluationMode::RealTime)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum EngineState {
    Initialised,
    Started,
    Stopped,
    Disposed,
}

enum Phase {
    Start,
    Eval,
    Stop,
    Dispose,
}

/// Owns the graph, the clock, the push inbox and the observer list; runs
/// the start/evaluate/stop state machine.
pub struct GraphEngine {
    graph: Graph,
    config: EngineConfig,
    clock: EngineClock,
    observers: Vec<Box<dyn LifecycleObserver>>,
    shared: Arc<EngineShared>,
    inbox: PushInbox,
    state: EngineState,
}

impl GraphEngine {
    pub fn new(graph: Graph, config: EngineConfig) -> Self {
        let inbox = PushInbox::new();
        let clock = EngineClock::new(config.mode, config.start_time, inbox.pending_flag());
        Self {
            graph,
            config,
            clock,
            observers: Vec::new(),
            shared: Arc::new(EngineShared::default()),
            inbox,
            state: EngineState::Initialised,
        }
    }

    #[inline]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    #[inline]
    pub fn clock(&self) -> &dyn EvaluationClock {
        &self.clock
    }

    #[inline]
    pub fn evaluation_time(&self) -> EngineTime {
        self.clock.evaluation_time()
    }

    /// Engine API handle usable from node code and host threads.
    pub fn shared(&self) -> Arc<EngineShared> {
        Arc::clone(&self.shared)
    }

    pub fn request_stop(&self) {
        self.shared.request_stop();
    }

    pub fn add_observer(&mut self, observer: Box<dyn LifecycleObserver>) {
        self.observers.push(observer);
    }

    /// Producer handle for a push source node.
    pub fn push_sender(&self, node: NodeHandle) -> Result<PushSender, GraphError> {
        let n = self
            .graph
            .node(node.0)
            .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound).with_node(node.0))?;
        if n.signature().kind != NodeKind::PushSource {
            return Err(GraphError::new(GraphErrorKind::TypeMismatch)
                .with_node(node.0)
                .with_message("push senders attach to push source nodes"));
        }
        Ok(self.inbox.sender(node.0))
    }

    fn notify_graph_observers(&mut self, f: impl Fn(&mut dyn LifecycleObserver, &Graph)) {
        let Self { observers, graph, .. } = self;
        for obs in observers.iter_mut() {
            f(obs.as_mut(), graph);
        }
    }

    fn notify_node_observers(&mut self, ndx: u32, f: impl Fn(&mut dyn LifecycleObserver, &Graph, u32)) {
        let Self { observers, graph, .. } = self;
        for obs in observers.iter_mut() {
            f(obs.as_mut(), graph, ndx);
        }
    }

    /* ───────────────────────── start ───────────────────────── */

    pub fn start(&mut self) -> Result<(), GraphError> {
        if self.state != EngineState::Initialised {
            return Err(GraphError::new(GraphErrorKind::InvariantViolation)
                .with_message("engine already started"));
        }
        let t = self.config.start_time;
        self.clock.set_evaluation_time(t);
        tracing::debug!(label = self.graph.label(), time = %t, "starting engine");

        self.notify_graph_observers(|o, g| o.on_before_start_graph(g));
        for ndx in 0..self.graph.node_count() {
            self.notify_node_observers(ndx as u32, |o, g, n| o.on_before_start_node(g, n));
            self.graph.nodes[ndx].state = NodeState::Started;
            let (result, wake) = self.run_body(ndx, Phase::Start);
            result.map_err(|e| e.with_node(ndx as u32))?;
            self.refresh_node_schedule(ndx, wake, MIN_DT);
            self.notify_node_observers(ndx as u32, |o, g, n| o.on_after_start_node(g, n));
        }

        // References peered to concrete outputs sample at the binding tick,
        // which for wiring-time binds is the start cycle.
        for ndx in 0..self.graph.node_count() {
            let mut fire = false;
            for link in &mut self.graph.nodes[ndx].links {
                if link.notify_once && link.sample_time == MIN_DT {
                    link.sample_time = t;
                    fire = true;
                }
            }
            if fire {
                self.graph.schedule_node(ndx as u32, t);
            }
        }

        self.graph.process_notifications(None, t)?;
        self.notify_graph_observers(|o, g| o.on_after_start_graph(g));
        self.state = EngineState::Started;
        Ok(())
    }

    /* ───────────────────────── evaluate ───────────────────────── */

    /// Run one cycle at the clock's current evaluation time.
    pub fn evaluate_cycle(&mut self) -> Result<(), GraphError> {
        let t = self.clock.evaluation_time();
        self.notify_graph_observers(|o, g| o.on_before_graph_evaluation(g));
        for cb in self.shared.drain_before() {
            cb();
        }

        // Push arrivals become visible now, in reception order.
        let events = self.inbox.drain();
        self.clock.reset_push_node_requires_scheduling();
        for ev in events {
            if let Some(q) = self.graph.push_queues.get_mut(&ev.node) {
                q.push_back(ev.value);
                self.graph.schedule_node(ev.node, t);
            } else {
                tracing::warn!(node = ev.node, "push event for non-push node dropped");
            }
        }

        // Push sources first, then everything else in declaration order.
        for ndx in 0..self.graph.node_count() {
            if self.graph.nodes[ndx].signature.is_push_source() && self.graph.schedule[ndx] <= t {
                self.eval_node(ndx, t)?;
            }
        }
        self.notify_graph_observers(|o, g| o.on_after_graph_push_nodes_evaluation(g));

        for ndx in 0..self.graph.node_count() {
            if !self.graph.nodes[ndx].signature.is_push_source() && self.graph.schedule[ndx] <= t {
                self.eval_node(ndx, t)?;
            }
        }

        self.notify_graph_observers(|o, g| o.on_after_graph_evaluation(g));
        for cb in self.shared.drain_after() {
            cb();
        }
        self.graph.end_cycle(t);
        Ok(())
    }

    fn eval_node(&mut self, ndx: usize, t: EngineTime) -> Result<(), GraphError> {
        self.graph.schedule[ndx] = MAX_DT;

        if !self.validity_gates_met(ndx) {
            tracing::trace!(node = self.graph.node_name(ndx as u32), "skipped: inputs not valid");
            // The skipped cycle still consumes due scheduler entries; fold
            // the node's remaining alarms back so they are not lost.
            self.refresh_node_schedule(ndx, false, t);
            return Ok(());
        }

        self.notify_node_observers(ndx as u32, |o, g, n| o.on_before_node_evaluation(g, n));
        let (result, wake) = self.run_body(ndx, Phase::Eval);

        if let Err(err) = result {
            let captured = self.graph.nodes[ndx].signature.capture_exception;
            if captured {
                tracing::warn!(node = self.graph.node_name(ndx as u32), error = %err, "evaluation error captured");
                self.write_error_output(ndx, t, &err)?;
            } else {
                tracing::error!(node = self.graph.node_name(ndx as u32), error = %err, "evaluation error aborts cycle");
                return Err(err.with_node(ndx as u32));
            }
        }

        self.notify_node_observers(ndx as u32, |o, g, n| o.on_after_node_evaluation(g, n));
        self.refresh_node_schedule(ndx, wake, t);
        self.graph.process_notifications(Some(ndx as u32), t)?;
        Ok(())
    }

    /// Check the signature's valid / all-valid input gates.
    fn validity_gates_met(&self, ndx: usize) -> bool {
        let node = &self.graph.nodes[ndx];
        for (i, decl) in node.signature.inputs.iter().enumerate() {
            if !(decl.require_valid || decl.require_all_valid) {
                continue;
            }
            let view = crate::link::InputView::new(
                OutputsView::all(&self.graph.outputs),
                &node.links,
                decl.meta,
                self.clock.evaluation_time(),
                &node.bindings[i],
            );
            if decl.require_valid && !view.valid() {
                return false;
            }
            if decl.require_all_valid && !view.all_valid() {
                return false;
            }
        }
        true
    }

    /// Run one lifecycle phase of a node body with the arena split around
    /// the node's own outputs.
    fn run_body(&mut self, ndx: usize, phase: Phase) -> (Result<(), GraphError>, bool) {
        let time = self.clock.evaluation_time();
        let now = self.clock.now();
        let shared = Arc::clone(&self.shared);
        let Graph {
            nodes,
            bodies,
            outputs,
            output_ranges,
            queue,
            push_queues,
            ..
        } = &mut self.graph;

        let node = &mut nodes[ndx];
        let body = &mut bodies[ndx];
        let (start, len) = output_ranges[ndx];
        let (own, others) = split_outputs(outputs, start as usize, len as usize);
        let push_queue = push_queues.get_mut(&(ndx as u32));

        let mut ctx = EvalContext {
            ndx: ndx as u32,
            time,
            now,
            node,
            own,
            own_start: start,
            outputs: others,
            queue,
            shared: &*shared,
            push_queue,
            wake_next_cycle: false,
        };
        let result = match phase {
            Phase::Start => body.start(&mut ctx),
            Phase::Eval => body.eval(&mut ctx),
            Phase::Stop => body.stop(&mut ctx),
            Phase::Dispose => body.dispose(&mut ctx),
        };
        let wake = ctx.wake_next_cycle;
        (result, wake)
    }

    /// Fold the node's scheduler (and a next-cycle wake request) back into
    /// the graph-level schedule after a phase ran at `t`.
    fn refresh_node_schedule(&mut self, ndx: usize, wake_next_cycle: bool, t: EngineTime) {
        let next = {
            let node = &mut self.graph.nodes[ndx];
            match node.scheduler.as_mut() {
                Some(s) => {
                    if t != MIN_DT {
                        s.advance(t);
                    }
                    s.first_scheduled_time()
                }
                None => MAX_DT,
            }
        };
        if next != MAX_DT {
            self.graph.schedule_node(ndx as u32, next);
        }
        if wake_next_cycle {
            let base = if t == MIN_DT { self.config.start_time } else { t };
            self.graph.schedule_node(ndx as u32, base + MIN_TD);
        }
    }

    fn write_error_output(&mut self, ndx: usize, t: EngineTime, err: &GraphError) -> Result<(), GraphError> {
        let Some(key) = self.graph.nodes[ndx].error_output else {
            return Ok(());
        };
        let Graph { outputs, queue, .. } = &mut self.graph;
        let out = &mut outputs[key.0 as usize];
        out.writer(t, queue)
            .set_scalar(ScalarValue::Str(err.to_string()))?;
        self.graph.process_notifications(Some(ndx as u32), t)
    }

    /* ───────────────────────── advance ───────────────────────── */

    /// The next cycle time: the earliest pending node time, preempted by
    /// push arrivals, bounded by the configured end time.
    fn next_time(&self) -> EngineTime {
        let t = self.clock.evaluation_time();
        let mut next = MAX_DT;
        for &s in &self.graph.schedule {
            if s > t && s < next {
                next = s;
            }
        }
        if self.inbox.has_pending() {
            let push_at = match self.clock.mode() {
                EvaluationMode::Simulation => t + MIN_TD,
                _ => wall_now().max(t + MIN_TD),
            };
            if push_at < next {
                next = push_at;
            }
        }
        next
    }

    /// Drive cycles until the end time, no work remains (simulation), or a
    /// stop is requested.
    pub fn run(&mut self) -> Result<(), GraphError> {
        if self.state == EngineState::Initialised {
            self.start()?;
        }
        if self.state != EngineState::Started {
            return Err(GraphError::new(GraphErrorKind::Stopped));
        }

        loop {
            if self.shared.is_stop_requested() {
                break;
            }
            if let Err(e) = self.evaluate_cycle() {
                self.stop()?;
                return Err(e);
            }

            let mut next = self.next_time();
            if self.clock.mode().is_wall_clock() {
                // Sleep until the next scheduled time; push arrivals and
                // stop requests preempt.
                loop {
                    if self.shared.is_stop_requested() || self.inbox.has_pending() {
                        break;
                    }
                    let deadline = if next == MAX_DT {
                        wall_now() + self.config.idle_wait
                    } else {
                        next
                    };
                    let deadline = deadline.min(self.config.end_time);
                    let woken = self.inbox.wait_until(deadline);
                    if woken || next != MAX_DT || wall_now() >= self.config.end_time {
                        break;
                    }
                }
                if self.inbox.has_pending() {
                    next = next.min(wall_now().max(self.clock.evaluation_time() + MIN_TD));
                }
            }

            if self.shared.is_stop_requested() {
                break;
            }
            if next >= self.config.end_time || next == MAX_DT {
                break;
            }
            self.clock.update_next_scheduled_evaluation_time(next);
            self.clock.advance_to_next_scheduled_time();
        }

        self.stop()
    }

    /* ───────────────────────── stop ───────────────────────── */

    pub fn stop(&mut self) -> Result<(), GraphError> {
        if matches!(self.state, EngineState::Stopped | EngineState::Disposed) {
            return Ok(());
        }
        tracing::debug!(label = self.graph.label(), "stopping engine");
        self.notify_graph_observers(|o, g| o.on_before_stop_graph(g));
        for ndx in (0..self.graph.node_count()).rev() {
            self.notify_node_observers(ndx as u32, |o, g, n| o.on_before_stop_node(g, n));
            self.graph.nodes[ndx].state = NodeState::Stopping;
            let (result, _) = self.run_body(ndx, Phase::Stop);
            if let Err(err) = result {
                tracing::warn!(node = self.graph.node_name(ndx as u32), error = %err, "stop hook failed");
            }
            self.graph.nodes[ndx].state = NodeState::Stopped;
            self.notify_node_observers(ndx as u32, |o, g, n| o.on_after_stop_node(g, n));
        }
        self.notify_graph_observers(|o, g| o.on_after_stop_graph(g));
        self.state = EngineState::Stopped;
        Ok(())
    }

    /// Tear node bodies down after stop, in reverse declaration order.
    /// Dispose failures are logged, not propagated; disposing twice is a
    /// no-op. Stops the engine first if it is still running.
    pub fn dispose(&mut self) -> Result<(), GraphError> {
        if self.state == EngineState::Disposed {
            return Ok(());
        }
        self.stop()?;
        tracing::debug!(label = self.graph.label(), "disposing engine");
        for ndx in (0..self.graph.node_count()).rev() {
            let (result, _) = self.run_body(ndx, Phase::Dispose);
            if let Err(err) = result {
                tracing::warn!(node = self.graph.node_name(ndx as u32), error = %err, "dispose hook failed");
            }
            self.graph.nodes[ndx].state = NodeState::Disposed;
        }
        self.state = EngineState::Disposed;
        Ok(())
    }
}
