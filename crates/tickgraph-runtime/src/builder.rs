//! Graph construction: two-pass arena build plus wiring.
//!
//! Pass 1 walks the node specs once and counts every output container the
//! graph will hold; pass 2 constructs nodes and outputs into exactly-sized
//! stores. A debug canary asserts the stores never reallocated between the
//! passes; producing more objects than were counted is `ArenaOverflow`.
//!
//! Wiring is validated here: direct (non-reference) edges must run from a
//! lower to a higher node index, which is what makes declaration order a
//! topological order at evaluation time. Kind coercion never happens
//! implicitly; an incompatible pairing is a `TypeMismatch`.

use rustc_hash::FxHashMap;
use std::collections::VecDeque;

use tickgraph_common::{GraphError, GraphErrorKind, MIN_DT};
use tickgraph_types::view::meta_at;
use tickgraph_types::{
    same_ts_meta, str_type, ts, NotifyQueue, OutputKey, Path, PathSeg, TsKind, TsMeta, TsValue,
};

use crate::graph::Graph;
use crate::link::{InputBinding, Link, LinkTarget};
use crate::node::{Node, NodeBody, NodeSignature, NodeState};
use crate::scheduler::NodeScheduler;

/// Builder-time identity of a node; becomes its arena index.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub u32);

struct NodeSpec {
    signature: NodeSignature,
    body: Box<dyn NodeBody>,
}

struct Connection {
    src: u32,
    src_path: Path,
    dst: u32,
    input: usize,
    dst_path: Path,
    element_index: Option<u32>,
}

pub struct GraphBuilder {
    label: String,
    specs: Vec<NodeSpec>,
    connections: Vec<Connection>,
    parent_node: Option<u32>,
}

impl GraphBuilder {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            specs: Vec::new(),
            connections: Vec::new(),
            parent_node: None,
        }
    }

    /// Nested-graph back-reference; informational.
    pub fn with_parent_node(mut self, parent: u32) -> Self {
        self.parent_node = Some(parent);
        self
    }

    pub fn add_node(
        &mut self,
        signature: NodeSignature,
        body: impl NodeBody + 'static,
    ) -> NodeHandle {
        let handle = NodeHandle(self.specs.len() as u32);
        self.specs.push(NodeSpec {
            signature,
            body: Box::new(body),
        });
        handle
    }

    /// Wire a whole output to a whole input.
    pub fn connect(
        &mut self,
        src: NodeHandle,
        dst: NodeHandle,
        input: &str,
    ) -> Result<(), GraphError> {
        self.connect_path(src, &[], dst, input, &[], None)
    }

    /// Wire one element of a list output to an input.
    pub fn connect_element(
        &mut self,
        src: NodeHandle,
        element: u32,
        dst: NodeHandle,
        input: &str,
    ) -> Result<(), GraphError> {
        self.connect_path(src, &[], dst, input, &[], Some(element))
    }

    /// Full wiring form: a position inside the source output to a position
    /// inside the destination input.
    pub fn connect_path(
        &mut self,
        src: NodeHandle,
        src_path: &[PathSeg],
        dst: NodeHandle,
        input: &str,
        dst_path: &[PathSeg],
        element_index: Option<u32>,
    ) -> Result<(), GraphError> {
        let dst_sig = &self
            .specs
            .get(dst.0 as usize)
            .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound).with_node(dst.0))?
            .signature;
        let input_idx = dst_sig.input_index(input).ok_or_else(|| {
            GraphError::new(GraphErrorKind::NotFound)
                .with_node(dst.0)
                .with_message(format!("no input named {input}"))
        })?;
        self.specs
            .get(src.0 as usize)
            .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound).with_node(src.0))?;
        self.connections.push(Connection {
            src: src.0,
            src_path: src_path.iter().copied().collect(),
            dst: dst.0,
            input: input_idx,
            dst_path: dst_path.iter().copied().collect(),
            element_index,
        });
        Ok(())
    }

    /// Build the graph into exactly-sized stores and wire every link.
    pub fn build(self) -> Result<Graph, GraphError> {
        let GraphBuilder {
            label,
            specs,
            connections,
            parent_node,
        } = self;

        // Pass 1: size everything.
        let node_count = specs.len();
        let mut output_ranges = Vec::with_capacity(node_count);
        let mut total_outputs = 0u32;
        for spec in &specs {
            let start = total_outputs;
            let mut len = 0u32;
            if spec.signature.output.is_some() {
                len += 1;
            }
            if spec.signature.capture_exception {
                len += 1;
            }
            if spec.signature.recordable_state.is_some() {
                len += 1;
            }
            output_ranges.push((start, len));
            total_outputs += len;
        }

        // Pass 2: construct in place.
        let mut nodes = Vec::with_capacity(node_count);
        let mut bodies = Vec::with_capacity(node_count);
        let mut outputs: Vec<TsValue> = Vec::with_capacity(total_outputs as usize);
        let outputs_canary = outputs.capacity();

        for (ndx, spec) in specs.into_iter().enumerate() {
            let NodeSpec { signature, body } = spec;
            let (start, _) = output_ranges[ndx];
            let mut next = start;

            let mut alloc = |meta: &'static TsMeta,
                             outputs: &mut Vec<TsValue>|
             -> Result<OutputKey, GraphError> {
                if outputs.len() as u32 >= total_outputs {
                    return Err(GraphError::new(GraphErrorKind::ArenaOverflow)
                        .with_message("output store exceeded its sized arena"));
                }
                let key = OutputKey(next);
                next += 1;
                outputs.push(TsValue::new(meta));
                Ok(key)
            };

            let output = match signature.output {
                Some(meta) => Some(alloc(meta, &mut outputs)?),
                None => None,
            };
            let error_output = if signature.capture_exception {
                Some(alloc(ts(str_type()), &mut outputs)?)
            } else {
                None
            };
            let recordable_state = match signature.recordable_state {
                Some(meta) => Some(alloc(meta, &mut outputs)?),
                None => None,
            };

            let scheduler = if signature.uses_scheduler() || signature.is_pull_source() {
                Some(NodeScheduler::new())
            } else {
                None
            };
            let bindings = signature
                .inputs
                .iter()
                .map(|i| InputBinding::Unbound(i.meta))
                .collect();

            nodes.push(Node {
                ndx: ndx as u32,
                signature,
                state: NodeState::Initialised,
                bindings,
                links: Vec::new(),
                output,
                error_output,
                recordable_state,
                scheduler,
            });
            bodies.push(body);
        }

        if outputs.len() as u32 != total_outputs {
            return Err(GraphError::new(GraphErrorKind::ArenaOverflow)
                .with_message("output count diverged from the sized arena"));
        }
        debug_assert_eq!(outputs.capacity(), outputs_canary, "output store reallocated");

        let schedule = vec![tickgraph_common::MAX_DT; node_count];
        let mut graph = Graph {
            label,
            nodes,
            bodies,
            outputs,
            output_ranges,
            schedule,
            queue: NotifyQueue::new(),
            push_queues: FxHashMap::default(),
            parent_node,
        };

        let push_nodes: Vec<u32> = graph
            .nodes
            .iter()
            .filter(|n| n.signature.is_push_source())
            .map(|n| n.ndx)
            .collect();
        for ndx in push_nodes {
            graph.push_queues.insert(ndx, VecDeque::new());
        }

        // Wiring: create links, validate compatibility, subscribe.
        for conn in connections {
            wire(&mut graph, conn)?;
        }

        Ok(graph)
    }
}

fn wire(graph: &mut Graph, conn: Connection) -> Result<(), GraphError> {
    if conn.src >= conn.dst {
        return Err(GraphError::new(GraphErrorKind::InvariantViolation)
            .with_node(conn.dst)
            .with_message("wiring must follow declaration order (topological)"));
    }

    let src_output = graph.nodes[conn.src as usize].output.ok_or_else(|| {
        GraphError::new(GraphErrorKind::TypeMismatch)
            .with_node(conn.src)
            .with_message("source node has no output")
    })?;
    let src_root_meta = graph.outputs[src_output.0 as usize].meta;
    let mut target_meta = meta_at(src_root_meta, &conn.src_path)?;
    if let Some(i) = conn.element_index {
        target_meta = meta_at(target_meta, &[PathSeg::Item(i)])?;
    }

    let input_root_meta = graph.nodes[conn.dst as usize].signature.inputs[conn.input].meta;
    let input_meta = meta_at(input_root_meta, &conn.dst_path)?;

    check_compatible(input_meta, target_meta).map_err(|e| e.with_node(conn.dst))?;

    let active = graph.nodes[conn.dst as usize].signature.inputs[conn.input].active;
    let link_idx = {
        let node = &mut graph.nodes[conn.dst as usize];
        let mut link = Link::new(input_meta);
        link.active = active;
        link.element_index = conn.element_index;
        let idx = node.links.len() as u32;
        node.links.push(link);
        place_binding(
            &mut node.bindings[conn.input],
            input_root_meta,
            &conn.dst_path,
            idx,
        )?;
        idx
    };

    graph.bind_link(
        conn.dst,
        link_idx,
        LinkTarget {
            output: src_output,
            path: conn.src_path,
        },
        MIN_DT,
    )
}

/// Kind compatibility at wiring time. Coercion is never implicit.
fn check_compatible(input: &'static TsMeta, target: &'static TsMeta) -> Result<(), GraphError> {
    // Signals accept any output shape.
    if input.kind == TsKind::Signal {
        return Ok(());
    }
    if same_ts_meta(input, target) {
        return Ok(());
    }
    // Reference input sampling a concrete output of the referenced shape.
    if input.kind == TsKind::Ref {
        if let Some(want) = input.ref_target() {
            if same_ts_meta(want, target) {
                return Ok(());
            }
        }
    }
    // Concrete input fed through a reference output (transparent deref).
    if target.kind == TsKind::Ref {
        if let Some(have) = target.ref_target() {
            if same_ts_meta(input, have) {
                return Ok(());
            }
        }
    }
    Err(GraphError::new(GraphErrorKind::TypeMismatch)
        .with_message(format!("cannot bind {} to {}", target.name, input.name)))
}

/// Install a link index at a position within an input's binding tree,
/// materialising intermediate field layers as needed.
fn place_binding(
    binding: &mut InputBinding,
    meta: &'static TsMeta,
    path: &[PathSeg],
    link_idx: u32,
) -> Result<(), GraphError> {
    match path.split_first() {
        None => {
            *binding = InputBinding::Link(link_idx);
            Ok(())
        }
        Some((PathSeg::Field(i), rest)) => {
            let fields = meta.fields().ok_or_else(|| {
                GraphError::new(GraphErrorKind::TypeMismatch)
                    .with_message(format!("{} has no fields", meta.name))
            })?;
            if matches!(binding, InputBinding::Unbound(_)) {
                *binding = InputBinding::Fields(
                    meta,
                    fields.iter().map(|f| InputBinding::Unbound(f.meta)).collect(),
                );
            }
            match binding {
                InputBinding::Fields(_, children) => {
                    let child_meta = fields
                        .get(*i as usize)
                        .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound))?
                        .meta;
                    place_binding(&mut children[*i as usize], child_meta, rest, link_idx)
                }
                _ => Err(GraphError::new(GraphErrorKind::TypeMismatch)
                    .with_message("position already peered as a whole")),
            }
        }
        Some(_) => Err(GraphError::new(GraphErrorKind::TypeMismatch)
            .with_message("input-side wiring paths descend through fields only")),
    }
}
