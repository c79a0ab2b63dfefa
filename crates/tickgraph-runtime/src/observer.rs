//! Lifecycle observers.
//!
//! The engine holds an ordered list of observers and invokes the hooks in
//! registration order at every lifecycle transition and cycle boundary.
//! Observers are passive: they see the graph and node indices, never mutate
//! engine state, and cannot abort evaluation.

use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

use crate::graph::Graph;

/// The lifecycle hook contract. All hooks default to no-ops so an observer
/// implements only what it cares about.
pub trait LifecycleObserver {
    fn on_before_start_graph(&mut self, _graph: &Graph) {}
    fn on_after_start_graph(&mut self, _graph: &Graph) {}

    fn on_before_start_node(&mut self, _graph: &Graph, _node: u32) {}
    fn on_after_start_node(&mut self, _graph: &Graph, _node: u32) {}

    fn on_before_graph_evaluation(&mut self, _graph: &Graph) {}
    fn on_after_graph_evaluation(&mut self, _graph: &Graph) {}

    fn on_before_node_evaluation(&mut self, _graph: &Graph, _node: u32) {}
    fn on_after_node_evaluation(&mut self, _graph: &Graph, _node: u32) {}

    /// Fires once per cycle after all eligible push source nodes have run.
    fn on_after_graph_push_nodes_evaluation(&mut self, _graph: &Graph) {}

    fn on_before_stop_node(&mut self, _graph: &Graph, _node: u32) {}
    fn on_after_stop_node(&mut self, _graph: &Graph, _node: u32) {}

    fn on_before_stop_graph(&mut self, _graph: &Graph) {}
    fn on_after_stop_graph(&mut self, _graph: &Graph) {}
}

/// Shared-handle forwarding, so a caller can keep reading an observer it
/// registered (e.g. to report profiler results after the run).
impl<T: LifecycleObserver> LifecycleObserver for std::sync::Arc<std::sync::Mutex<T>> {
    fn on_before_start_graph(&mut self, g: &Graph) {
        self.lock().expect("observer poisoned").on_before_start_graph(g);
    }
    fn on_after_start_graph(&mut self, g: &Graph) {
        self.lock().expect("observer poisoned").on_after_start_graph(g);
    }
    fn on_before_start_node(&mut self, g: &Graph, n: u32) {
        self.lock().expect("observer poisoned").on_before_start_node(g, n);
    }
    fn on_after_start_node(&mut self, g: &Graph, n: u32) {
        self.lock().expect("observer poisoned").on_after_start_node(g, n);
    }
    fn on_before_graph_evaluation(&mut self, g: &Graph) {
        self.lock().expect("observer poisoned").on_before_graph_evaluation(g);
    }
    fn on_after_graph_evaluation(&mut self, g: &Graph) {
        self.lock().expect("observer poisoned").on_after_graph_evaluation(g);
    }
    fn on_before_node_evaluation(&mut self, g: &Graph, n: u32) {
        self.lock().expect("observer poisoned").on_before_node_evaluation(g, n);
    }
    fn on_after_node_evaluation(&mut self, g: &Graph, n: u32) {
        self.lock().expect("observer poisoned").on_after_node_evaluation(g, n);
    }
    fn on_after_graph_push_nodes_evaluation(&mut self, g: &Graph) {
        self.lock()
            .expect("observer poisoned")
            .on_after_graph_push_nodes_evaluation(g);
    }
    fn on_before_stop_node(&mut self, g: &Graph, n: u32) {
        self.lock().expect("observer poisoned").on_before_stop_node(g, n);
    }
    fn on_after_stop_node(&mut self, g: &Graph, n: u32) {
        self.lock().expect("observer poisoned").on_after_stop_node(g, n);
    }
    fn on_before_stop_graph(&mut self, g: &Graph) {
        self.lock().expect("observer poisoned").on_before_stop_graph(g);
    }
    fn on_after_stop_graph(&mut self, g: &Graph) {
        self.lock().expect("observer poisoned").on_after_stop_graph(g);
    }
}

/// Logs every hook through `tracing` at debug level.
#[derive(Debug, Default)]
pub struct TraceObserver;

impl LifecycleObserver for TraceObserver {
    fn on_before_start_graph(&mut self, graph: &Graph) {
        tracing::debug!(label = graph.label(), "starting graph");
    }

    fn on_after_start_graph(&mut self, graph: &Graph) {
        tracing::debug!(label = graph.label(), nodes = graph.node_count(), "graph started");
    }

    fn on_before_start_node(&mut self, graph: &Graph, node: u32) {
        tracing::debug!(node = graph.node_name(node), "starting node");
    }

    fn on_before_graph_evaluation(&mut self, graph: &Graph) {
        tracing::trace!(label = graph.label(), "cycle begin");
    }

    fn on_after_graph_evaluation(&mut self, graph: &Graph) {
        tracing::trace!(label = graph.label(), "cycle end");
    }

    fn on_before_node_evaluation(&mut self, graph: &Graph, node: u32) {
        tracing::trace!(node = graph.node_name(node), "eval");
    }

    fn on_before_stop_graph(&mut self, graph: &Graph) {
        tracing::debug!(label = graph.label(), "stopping graph");
    }

    fn on_after_stop_graph(&mut self, graph: &Graph) {
        tracing::debug!(label = graph.label(), "graph stopped");
    }
}

/// Per-node evaluation counts and cumulative wall time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeProfile {
    pub evaluations: u64,
    pub total: Duration,
}

/// Accumulates evaluation statistics per node.
#[derive(Debug, Default)]
pub struct ProfileObserver {
    profiles: FxHashMap<u32, NodeProfile>,
    cycles: u64,
    started: Option<Instant>,
}

impl ProfileObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile(&self, node: u32) -> Option<&NodeProfile> {
        self.profiles.get(&node)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

impl LifecycleObserver for ProfileObserver {
    fn on_before_node_evaluation(&mut self, _graph: &Graph, _node: u32) {
        self.started = Some(Instant::now());
    }

    fn on_after_node_evaluation(&mut self, _graph: &Graph, node: u32) {
        let elapsed = self
            .started
            .take()
            .map(|s| s.elapsed())
            .unwrap_or_default();
        let entry = self.profiles.entry(node).or_default();
        entry.evaluations += 1;
        entry.total += elapsed;
    }

    fn on_after_graph_evaluation(&mut self, _graph: &Graph) {
        self.cycles += 1;
    }
}
