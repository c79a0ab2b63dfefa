//! The graph arena: nodes, bodies and all output storage in
//! struct-of-arrays layout with stable ids between them.
//!
//! The graph owns every `TsValue` in one contiguous store; nodes hold
//! `OutputKey` indices rather than pointers, so nothing in the arena owns
//! anything outside it and teardown is a single drop. During a node's
//! evaluation the store is split around the node's own output range: the
//! node gets `&mut` to its outputs, link traversal reads everything else
//! through a read-only [`OutputsView`].

use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tickgraph_common::{EngineTime, EngineTimeDelta, GraphError, GraphErrorKind, ScalarValue};
use tickgraph_types::view::meta_at;
use tickgraph_types::{
    NotifyQueue, OutputKey, SubscriberId, TsKind, TsOutputView, TsValue, TsView, Value,
};

use crate::link::{InputBinding, InputView, Link, LinkTarget};
use crate::node::{Node, NodeBody};
use crate::scheduler::NodeScheduler;

/// The smallest representable step between cycles.
pub const MIN_TD: EngineTimeDelta = EngineTimeDelta::from_micros(1);

/// Read-only window over the output store with one node's own range carved
/// out. Reading a key inside the carved range is the forbidden same-cycle
/// self-read.
#[derive(Copy, Clone)]
pub struct OutputsView<'a> {
    first: &'a [TsValue],
    rest: &'a [TsValue],
    start: usize,
    len: usize,
}

impl<'a> OutputsView<'a> {
    /// A view over the whole store (no carve-out).
    pub(crate) fn all(outputs: &'a [TsValue]) -> Self {
        Self {
            first: outputs,
            rest: &[],
            start: outputs.len(),
            len: 0,
        }
    }

    pub fn get(&self, key: OutputKey) -> Result<&'a TsValue, GraphError> {
        let idx = key.0 as usize;
        if idx < self.start {
            self.first
                .get(idx)
                .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound))
        } else if idx >= self.start + self.len {
            self.rest
                .get(idx - self.start - self.len)
                .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound))
        } else {
            Err(GraphError::new(GraphErrorKind::UnboundReference)
                .with_message("a node cannot observe its own output within the cycle"))
        }
    }
}

/// Split the store around one node's contiguous output range.
pub(crate) fn split_outputs(
    outputs: &mut [TsValue],
    start: usize,
    len: usize,
) -> (&mut [TsValue], OutputsView<'_>) {
    let (first, tail) = outputs.split_at_mut(start);
    let (own, rest) = tail.split_at_mut(len);
    (
        own,
        OutputsView {
            first,
            rest,
            start,
            len,
        },
    )
}

type Callback = Box<dyn FnOnce() + Send>;

/// Engine state reachable from node code: the stop flag and the one-shot
/// cycle-boundary callback queues.
#[derive(Default)]
pub struct EngineShared {
    stop_requested: AtomicBool,
    before_callbacks: Mutex<Vec<Callback>>,
    after_callbacks: Mutex<Vec<Callback>>,
}

impl EngineShared {
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub fn add_before_evaluation(&self, f: Callback) {
        self.before_callbacks
            .lock()
            .expect("callback queue poisoned")
            .push(f);
    }

    pub fn add_after_evaluation(&self, f: Callback) {
        self.after_callbacks
            .lock()
            .expect("callback queue poisoned")
            .push(f);
    }

    pub(crate) fn drain_before(&self) -> Vec<Callback> {
        std::mem::take(&mut *self.before_callbacks.lock().expect("callback queue poisoned"))
    }

    pub(crate) fn drain_after(&self) -> Vec<Callback> {
        std::mem::take(&mut *self.after_callbacks.lock().expect("callback queue poisoned"))
    }
}

/// One constructed graph: the arena plus scheduling state.
pub struct Graph {
    pub(crate) label: String,
    pub(crate) nodes: Vec<Node>,
    pub(crate) bodies: Vec<Box<dyn NodeBody>>,
    pub(crate) outputs: Vec<TsValue>,
    /// Per-node `(start, len)` range within `outputs`.
    pub(crate) output_ranges: Vec<(u32, u32)>,
    /// Next pending evaluation time per node; MAX_DT when idle.
    pub(crate) schedule: Vec<EngineTime>,
    pub(crate) queue: NotifyQueue,
    /// Per push-source-node queues, fed from the inbox at cycle start.
    pub(crate) push_queues: FxHashMap<u32, VecDeque<Value>>,
    /// Back-reference for nested graphs; informational.
    pub(crate) parent_node: Option<u32>,
}

impl Graph {
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, ndx: u32) -> Option<&Node> {
        self.nodes.get(ndx as usize)
    }

    pub fn node_name(&self, ndx: u32) -> &str {
        self.nodes
            .get(ndx as usize)
            .map(|n| n.signature.name.as_str())
            .unwrap_or("?")
    }

    pub fn parent_node(&self) -> Option<u32> {
        self.parent_node
    }

    /// Read view of any output position.
    pub fn output_view(&self, key: OutputKey, time: EngineTime) -> Result<TsView<'_>, GraphError> {
        self.outputs
            .get(key.0 as usize)
            .map(|o| o.view(time))
            .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound))
    }

    /// Read view of a node's primary output.
    pub fn node_output_view(&self, ndx: u32, time: EngineTime) -> Result<TsView<'_>, GraphError> {
        let node = self
            .nodes
            .get(ndx as usize)
            .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound).with_node(ndx))?;
        let key = node
            .output
            .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound).with_node(ndx))?;
        self.output_view(key, time)
    }

    /// Read view of one input of a node, outside of evaluation.
    pub fn input_view(&self, ndx: u32, input: usize, time: EngineTime) -> Result<InputView<'_>, GraphError> {
        let node = self
            .nodes
            .get(ndx as usize)
            .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound).with_node(ndx))?;
        let decl = node
            .signature
            .inputs
            .get(input)
            .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound).with_node(ndx))?;
        Ok(InputView::new(
            OutputsView::all(&self.outputs),
            &node.links,
            decl.meta,
            time,
            &node.bindings[input],
        ))
    }

    /* ───────────────────── link management ───────────────────── */

    /// Bind a link to a new target. Active state and subscriptions carry
    /// over; rebinding to the identical target is a no-op.
    pub fn bind_link(
        &mut self,
        node: u32,
        link: u32,
        target: LinkTarget,
        time: EngineTime,
    ) -> Result<(), GraphError> {
        {
            let l = self.link(node, link)?;
            if l.target.as_ref() == Some(&target) {
                return Ok(());
            }
        }
        self.unsubscribe_link(node, link);

        let target_meta = {
            let out = self
                .outputs
                .get(target.output.0 as usize)
                .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound))?;
            meta_at(out.meta, &target.path)?
        };

        let l = self.link_mut(node, link)?;
        let input_kind = l.input_meta.kind;
        l.notify_once = input_kind == TsKind::Ref && target_meta.kind != TsKind::Ref;
        l.deref_mode = input_kind != TsKind::Ref
            && input_kind != TsKind::Signal
            && target_meta.kind == TsKind::Ref;
        l.target = Some(target);
        l.deref = None;
        if input_kind == TsKind::Ref {
            // The binding instant is the reference's sample time.
            l.sample_time = time;
        }

        if self.link(node, link)?.active {
            self.subscribe_link(node, link)?;
            self.refresh_deref(node, link, time)?;
        }
        Ok(())
    }

    /// Unbind, preserving the active flag for a later rebind.
    pub fn unbind_link(&mut self, node: u32, link: u32) -> Result<(), GraphError> {
        self.unsubscribe_link(node, link);
        let l = self.link_mut(node, link)?;
        l.target = None;
        l.deref = None;
        l.deref_mode = false;
        l.notify_once = false;
        Ok(())
    }

    /// Toggle a single link's subscription.
    pub fn set_link_active(&mut self, node: u32, link: u32, active: bool) -> Result<(), GraphError> {
        let was = {
            let l = self.link_mut(node, link)?;
            let was = l.active;
            l.active = active;
            was
        };
        if active && !was {
            if self.link(node, link)?.bound() {
                self.subscribe_link(node, link)?;
            }
        } else if !active && was {
            // Flag already cleared; drop the overlay subscriptions.
            self.remove_subscriptions(node, link);
        }
        Ok(())
    }

    /// Activate or passivate a whole input subtree.
    pub fn set_input_active(&mut self, node: u32, input: usize, active: bool) -> Result<(), GraphError> {
        let links = {
            let n = self
                .nodes
                .get(node as usize)
                .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound).with_node(node))?;
            let mut acc = Vec::new();
            collect_links(&n.bindings[input], &mut acc);
            acc
        };
        for l in links {
            self.set_link_active(node, l, active)?;
        }
        Ok(())
    }

    pub(crate) fn link(&self, node: u32, link: u32) -> Result<&Link, GraphError> {
        self.nodes
            .get(node as usize)
            .and_then(|n| n.links.get(link as usize))
            .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound).with_node(node))
    }

    pub(crate) fn link_mut(&mut self, node: u32, link: u32) -> Result<&mut Link, GraphError> {
        self.nodes
            .get_mut(node as usize)
            .and_then(|n| n.links.get_mut(link as usize))
            .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound).with_node(node))
    }

    pub(crate) fn subscribe_link(&mut self, node: u32, link: u32) -> Result<(), GraphError> {
        let (target, path) = {
            let l = self.link(node, link)?;
            match (&l.target, l.subscription_path()) {
                (Some(t), Some(p)) => (t.output, p),
                _ => return Ok(()),
            }
        };
        let sub = SubscriberId { node, link };
        let out = self
            .outputs
            .get_mut(target.0 as usize)
            .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound))?;
        out.overlay.subscribe(&path, sub)
    }

    pub(crate) fn unsubscribe_link(&mut self, node: u32, link: u32) {
        self.remove_subscriptions(node, link);
    }

    fn remove_subscriptions(&mut self, node: u32, link: u32) {
        let sub = SubscriberId { node, link };
        let (target, deref) = match self.link(node, link) {
            Ok(l) => (
                l.target.as_ref().map(|t| (t.output, l.subscription_path().unwrap_or_default())),
                l.deref.clone(),
            ),
            Err(_) => return,
        };
        if let Some((key, path)) = target {
            if let Some(out) = self.outputs.get_mut(key.0 as usize) {
                out.overlay.unsubscribe(&path, sub);
            }
        }
        if let Some(d) = deref {
            if let Some(out) = self.outputs.get_mut(d.output.0 as usize) {
                out.overlay.unsubscribe(&d.path, sub);
            }
        }
    }

    /// Re-resolve the deref subscription of a link bound through a
    /// reference output. Returns true when the target changed.
    pub(crate) fn refresh_deref(
        &mut self,
        node: u32,
        link: u32,
        time: EngineTime,
    ) -> Result<bool, GraphError> {
        let (deref_mode, active, target, old) = {
            let l = self.link(node, link)?;
            (l.deref_mode, l.active, l.target.clone(), l.deref.clone())
        };
        if !deref_mode {
            return Ok(false);
        }
        let Some(target) = target else { return Ok(false) };

        let new = {
            let out = self
                .outputs
                .get(target.output.0 as usize)
                .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound))?;
            let view = out.view(time).at_path(&target.path)?;
            match view.ref_value() {
                Ok(r) => r
                    .target()
                    .map(|(output, path)| LinkTarget { output, path: path.iter().copied().collect() }),
                Err(_) => None,
            }
        };
        if new == old {
            return Ok(false);
        }

        let sub = SubscriberId { node, link };
        if active {
            if let Some(o) = &old {
                if let Some(out) = self.outputs.get_mut(o.output.0 as usize) {
                    out.overlay.unsubscribe(&o.path, sub);
                }
            }
            if let Some(n) = &new {
                let out = self
                    .outputs
                    .get_mut(n.output.0 as usize)
                    .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound))?;
                out.overlay.subscribe(&n.path, sub)?;
            }
        }
        let l = self.link_mut(node, link)?;
        l.deref = new;
        // A rebind is a fresh sample of the referenced output.
        l.sample_time = time;
        Ok(true)
    }

    /* ───────────────────── scheduling ───────────────────── */

    pub(crate) fn schedule_node(&mut self, node: u32, when: EngineTime) {
        let slot = &mut self.schedule[node as usize];
        if when < *slot {
            *slot = when;
        }
    }

    pub fn next_node_time(&self, node: u32) -> EngineTime {
        self.schedule[node as usize]
    }

    /// Route queued notifications through link dedup and schedule the
    /// receiving nodes. `current_idx` is the node currently being swept in
    /// declaration order; a notification reaching a node at or before it is
    /// deferred to the next cycle.
    pub(crate) fn process_notifications(
        &mut self,
        current_idx: Option<u32>,
        cycle_time: EngineTime,
    ) -> Result<(), GraphError> {
        loop {
            let items: Vec<(SubscriberId, EngineTime)> = self.queue.drain().collect();
            if items.is_empty() {
                return Ok(());
            }
            for (sub, time) in items {
                let accepted = {
                    let l = self.link_mut(sub.node, sub.link)?;
                    l.accept_notification(time)
                };
                if !accepted {
                    continue;
                }
                if self.link(sub.node, sub.link)?.deref_mode {
                    self.refresh_deref(sub.node, sub.link, time)?;
                }
                let passed = current_idx.map(|c| sub.node <= c).unwrap_or(false);
                let when = if passed && time == cycle_time {
                    time + MIN_TD
                } else {
                    time
                };
                self.schedule_node(sub.node, when);
            }
        }
    }

    /// Cycle-end housekeeping over outputs that ticked.
    pub(crate) fn end_cycle(&mut self, time: EngineTime) {
        for out in &mut self.outputs {
            out.end_cycle(time);
        }
    }
}

fn collect_links(binding: &InputBinding, acc: &mut Vec<u32>) {
    match binding {
        InputBinding::Unbound(_) => {}
        InputBinding::Link(idx) => acc.push(*idx),
        InputBinding::Fields(_, children) => {
            for c in children {
                collect_links(c, acc);
            }
        }
    }
}

/* ───────────────────────── eval context ───────────────────────────── */

/// Everything a node body can reach during one evaluation.
pub struct EvalContext<'a> {
    pub(crate) ndx: u32,
    pub(crate) time: EngineTime,
    pub(crate) now: EngineTime,
    pub(crate) node: &'a mut Node,
    pub(crate) own: &'a mut [TsValue],
    pub(crate) own_start: u32,
    pub(crate) outputs: OutputsView<'a>,
    pub(crate) queue: &'a mut NotifyQueue,
    pub(crate) shared: &'a EngineShared,
    pub(crate) push_queue: Option<&'a mut VecDeque<Value>>,
    pub(crate) wake_next_cycle: bool,
}

impl<'a> EvalContext<'a> {
    #[inline]
    pub fn evaluation_time(&self) -> EngineTime {
        self.time
    }

    #[inline]
    pub fn now(&self) -> EngineTime {
        self.now
    }

    #[inline]
    pub fn node_ndx(&self) -> u32 {
        self.ndx
    }

    pub fn node_name(&self) -> &str {
        &self.node.signature.name
    }

    /// A wiring-time scalar constant.
    pub fn scalar(&self, name: &str) -> Option<&ScalarValue> {
        self.node.signature.scalars.get(name)
    }

    /* ── inputs ── */

    pub fn input(&self, name: &str) -> Result<InputView<'_>, GraphError> {
        let idx = self
            .node
            .signature
            .input_index(name)
            .ok_or_else(|| {
                GraphError::new(GraphErrorKind::NotFound)
                    .with_node(self.ndx)
                    .with_message(format!("no input named {name}"))
            })?;
        self.input_at(idx)
    }

    pub fn input_at(&self, idx: usize) -> Result<InputView<'_>, GraphError> {
        let decl = self
            .node
            .signature
            .inputs
            .get(idx)
            .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound).with_node(self.ndx))?;
        Ok(InputView::new(
            self.outputs,
            &self.node.links,
            decl.meta,
            self.time,
            &self.node.bindings[idx],
        ))
    }

    /* ── outputs ── */

    pub fn output(&mut self) -> Result<TsOutputView<'_>, GraphError> {
        let key = self
            .node
            .output
            .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound).with_node(self.ndx))?;
        self.own_writer(key)
    }

    pub fn recordable_state(&mut self) -> Result<TsOutputView<'_>, GraphError> {
        let key = self
            .node
            .recordable_state
            .ok_or_else(|| GraphError::not_capable("recordable-state").with_node(self.ndx))?;
        self.own_writer(key)
    }

    fn own_writer(&mut self, key: OutputKey) -> Result<TsOutputView<'_>, GraphError> {
        let rel = (key.0 - self.own_start) as usize;
        let EvalContext { own, queue, time, .. } = self;
        own.get_mut(rel)
            .map(|o| o.writer(*time, queue))
            .ok_or_else(|| GraphError::new(GraphErrorKind::InvariantViolation))
    }

    /* ── scheduler ── */

    pub fn scheduler(&mut self) -> Result<&mut NodeScheduler, GraphError> {
        self.node
            .scheduler
            .as_mut()
            .ok_or_else(|| GraphError::not_capable("scheduler").with_node(self.ndx))
    }

    pub fn schedule(&mut self, when: EngineTime, tag: Option<&str>) -> Result<(), GraphError> {
        self.scheduler()?.schedule(when, tag);
        Ok(())
    }

    /// Schedule relative to the evaluation time, or to `now()` when
    /// `on_wall_clock` is set (real-time alarms).
    pub fn schedule_in(
        &mut self,
        delta: EngineTimeDelta,
        tag: Option<&str>,
        on_wall_clock: bool,
    ) -> Result<(), GraphError> {
        let base = if on_wall_clock { self.now } else { self.time };
        self.scheduler()?.schedule_in(delta, tag, base, on_wall_clock);
        Ok(())
    }

    /// Request a wake at the next engine cycle regardless of input ticks.
    pub fn notify_next_cycle(&mut self) {
        self.wake_next_cycle = true;
    }

    /* ── push queue (push sources only) ── */

    pub fn pop_push_value(&mut self) -> Option<Value> {
        self.push_queue.as_mut().and_then(|q| q.pop_front())
    }

    pub fn pending_push_count(&self) -> usize {
        self.push_queue.as_ref().map(|q| q.len()).unwrap_or(0)
    }

    /* ── engine api ── */

    pub fn request_stop(&self) {
        self.shared.request_stop();
    }

    pub fn add_before_evaluation(&self, f: impl FnOnce() + Send + 'static) {
        self.shared.add_before_evaluation(Box::new(f));
    }

    pub fn add_after_evaluation(&self, f: impl FnOnce() + Send + 'static) {
        self.shared.add_after_evaluation(Box::new(f));
    }
}
