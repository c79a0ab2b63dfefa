//! Node signatures, node state and the evaluation body contract.

use bitflags::bitflags;
use rustc_hash::FxHashMap;
use std::fmt;

use tickgraph_common::{GraphError, ScalarValue};
use tickgraph_types::{OutputKey, TsMeta};

use crate::graph::EvalContext;
use crate::link::{InputBinding, Link};
use crate::scheduler::NodeScheduler;

/// Node classification. Sources drive the graph; compute and sink nodes
/// re-evaluate when subscribed inputs tick.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Externally fed through the push inbox.
    PushSource,
    /// Emits from its own schedule (wall-clock pulls, replay buffers).
    PullSource,
    Compute,
    Sink,
}

impl NodeKind {
    pub fn is_source(self) -> bool {
        matches!(self, NodeKind::PushSource | NodeKind::PullSource)
    }
}

bitflags! {
    /// Which runtime-supplied values the node body receives.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Injectables: u16 {
        const STATE            = 1 << 0;
        const RECORDABLE_STATE = 1 << 1;
        const SCHEDULER        = 1 << 2;
        const OUTPUT           = 1 << 3;
        const CLOCK            = 1 << 4;
        const ENGINE_API       = 1 << 5;
        const LOGGER           = 1 << 6;
        const NODE             = 1 << 7;
        const TRAIT            = 1 << 8;
    }
}

/// One declared time-series input parameter.
#[derive(Debug, Clone)]
pub struct InputDecl {
    pub name: String,
    pub meta: &'static TsMeta,
    /// Starts subscribed. Passive inputs are readable but do not wake the node.
    pub active: bool,
    /// Skip evaluation until this input is valid.
    pub require_valid: bool,
    /// Skip evaluation until this input is recursively valid.
    pub require_all_valid: bool,
}

/// Immutable description of a node: what it is called, what it consumes and
/// produces, and which runtime facilities its body uses.
#[derive(Debug, Clone)]
pub struct NodeSignature {
    pub name: String,
    pub kind: NodeKind,
    pub inputs: Vec<InputDecl>,
    pub output: Option<&'static TsMeta>,
    pub recordable_state: Option<&'static TsMeta>,
    pub scalars: FxHashMap<String, ScalarValue>,
    pub wiring_path: String,
    pub label: Option<String>,
    pub injectables: Injectables,
    /// Evaluation failures are surfaced on the node's error output instead
    /// of aborting the cycle.
    pub capture_exception: bool,
    pub capture_values: bool,
    pub record_replay_id: Option<String>,
    pub has_nested_graphs: bool,
}

impl NodeSignature {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs: Vec::new(),
            output: None,
            recordable_state: None,
            scalars: FxHashMap::default(),
            wiring_path: String::new(),
            label: None,
            injectables: Injectables::empty(),
            capture_exception: false,
            capture_values: false,
            record_replay_id: None,
            has_nested_graphs: false,
        }
    }

    #[inline]
    pub fn with_input(mut self, name: impl Into<String>, meta: &'static TsMeta) -> Self {
        self.inputs.push(InputDecl {
            name: name.into(),
            meta,
            active: true,
            require_valid: false,
            require_all_valid: false,
        });
        self
    }

    /// A passive input: readable during evaluation, never wakes the node.
    #[inline]
    pub fn with_passive_input(mut self, name: impl Into<String>, meta: &'static TsMeta) -> Self {
        self.inputs.push(InputDecl {
            name: name.into(),
            meta,
            active: false,
            require_valid: false,
            require_all_valid: false,
        });
        self
    }

    /// Mark already-declared inputs as validity gates.
    pub fn with_valid_inputs(mut self, names: &[&str]) -> Self {
        for input in &mut self.inputs {
            if names.contains(&input.name.as_str()) {
                input.require_valid = true;
            }
        }
        self
    }

    pub fn with_all_valid_inputs(mut self, names: &[&str]) -> Self {
        for input in &mut self.inputs {
            if names.contains(&input.name.as_str()) {
                input.require_all_valid = true;
            }
        }
        self
    }

    #[inline]
    pub fn with_output(mut self, meta: &'static TsMeta) -> Self {
        self.output = Some(meta);
        self
    }

    #[inline]
    pub fn with_recordable_state(mut self, meta: &'static TsMeta, replay_id: impl Into<String>) -> Self {
        self.recordable_state = Some(meta);
        self.record_replay_id = Some(replay_id.into());
        self.injectables |= Injectables::RECORDABLE_STATE;
        self
    }

    #[inline]
    pub fn with_scalar(mut self, name: impl Into<String>, value: ScalarValue) -> Self {
        self.scalars.insert(name.into(), value);
        self
    }

    #[inline]
    pub fn with_injectables(mut self, injectables: Injectables) -> Self {
        self.injectables |= injectables;
        self
    }

    #[inline]
    pub fn with_scheduler(self) -> Self {
        self.with_injectables(Injectables::SCHEDULER)
    }

    #[inline]
    pub fn with_capture_exception(mut self) -> Self {
        self.capture_exception = true;
        self
    }

    #[inline]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[inline]
    pub fn with_wiring_path(mut self, path: impl Into<String>) -> Self {
        self.wiring_path = path.into();
        self
    }

    /* derived flags */

    pub fn uses_scheduler(&self) -> bool {
        self.injectables.contains(Injectables::SCHEDULER)
    }

    pub fn uses_clock(&self) -> bool {
        self.injectables.contains(Injectables::CLOCK)
    }

    pub fn uses_engine(&self) -> bool {
        self.injectables.contains(Injectables::ENGINE_API)
    }

    pub fn uses_state(&self) -> bool {
        self.injectables.contains(Injectables::STATE)
    }

    pub fn uses_recordable_state(&self) -> bool {
        self.injectables.contains(Injectables::RECORDABLE_STATE)
    }

    pub fn uses_output_feedback(&self) -> bool {
        self.injectables.contains(Injectables::OUTPUT)
    }

    pub fn is_push_source(&self) -> bool {
        self.kind == NodeKind::PushSource
    }

    pub fn is_pull_source(&self) -> bool {
        self.kind == NodeKind::PullSource
    }

    pub fn is_source(&self) -> bool {
        self.kind.is_source()
    }

    pub fn is_compute(&self) -> bool {
        self.kind == NodeKind::Compute
    }

    pub fn is_sink(&self) -> bool {
        self.kind == NodeKind::Sink
    }

    pub fn is_recordable(&self) -> bool {
        self.record_replay_id.is_some()
    }

    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|i| i.name == name)
    }

    /// Human-readable `name(in: TS[...]) -> TS[...]` rendering.
    pub fn render(&self) -> String {
        let args = self
            .inputs
            .iter()
            .map(|i| format!("{}: {}", i.name, i.meta.name))
            .collect::<Vec<_>>()
            .join(", ");
        match self.output {
            Some(out) => format!("{}({args}) -> {}", self.name, out.name),
            None => format!("{}({args})", self.name),
        }
    }
}

impl fmt::Display for NodeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Node lifecycle states.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeState {
    Initialised,
    Started,
    Stopping,
    Stopped,
    Disposed,
}

/// The user-supplied evaluation body. Implemented directly for closures.
pub trait NodeBody {
    fn start(&mut self, _ctx: &mut EvalContext<'_>) -> Result<(), GraphError> {
        Ok(())
    }

    fn eval(&mut self, ctx: &mut EvalContext<'_>) -> Result<(), GraphError>;

    fn stop(&mut self, _ctx: &mut EvalContext<'_>) -> Result<(), GraphError> {
        Ok(())
    }

    /// Final teardown after stop; release resources the body holds beyond
    /// the evaluation loop.
    fn dispose(&mut self, _ctx: &mut EvalContext<'_>) -> Result<(), GraphError> {
        Ok(())
    }
}

impl<F> NodeBody for F
where
    F: FnMut(&mut EvalContext<'_>) -> Result<(), GraphError> + 'static,
{
    fn eval(&mut self, ctx: &mut EvalContext<'_>) -> Result<(), GraphError> {
        self(ctx)
    }
}

/// Runtime state of one node in the arena.
pub struct Node {
    pub(crate) ndx: u32,
    pub(crate) signature: NodeSignature,
    pub(crate) state: NodeState,
    /// One binding per declared input, parallel to `signature.inputs`.
    pub(crate) bindings: Vec<InputBinding>,
    /// Flat link table; bindings and overlay subscribers index into it.
    pub(crate) links: Vec<Link>,
    pub(crate) output: Option<OutputKey>,
    pub(crate) error_output: Option<OutputKey>,
    pub(crate) recordable_state: Option<OutputKey>,
    pub(crate) scheduler: Option<NodeScheduler>,
}

impl Node {
    #[inline]
    pub fn ndx(&self) -> u32 {
        self.ndx
    }

    #[inline]
    pub fn signature(&self) -> &NodeSignature {
        &self.signature
    }

    #[inline]
    pub fn state(&self) -> NodeState {
        self.state
    }

    #[inline]
    pub fn output(&self) -> Option<OutputKey> {
        self.output
    }

    #[inline]
    pub fn error_output(&self) -> Option<OutputKey> {
        self.error_output
    }

    #[inline]
    pub fn recordable_state(&self) -> Option<OutputKey> {
        self.recordable_state
    }

    pub fn has_scheduler(&self) -> bool {
        self.scheduler.is_some()
    }

    pub fn scheduler(&self) -> Option<&NodeScheduler> {
        self.scheduler.as_ref()
    }

    pub fn scheduler_mut(&mut self) -> Option<&mut NodeScheduler> {
        self.scheduler.as_mut()
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("ndx", &self.ndx)
            .field("name", &self.signature.name)
            .field("state", &self.state)
            .finish()
    }
}
