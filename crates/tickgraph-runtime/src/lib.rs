//! Graph runtime for tickgraph.
//!
//! Pairs the typed value model from `tickgraph-types` with the pieces that
//! make a running graph: links and input views, node signatures and
//! bodies, per-node schedulers, the push inbox, lifecycle observers, the
//! arena-building graph constructor and the cycle-driven engine loop.

pub mod builder;
pub mod clock;
pub mod engine;
pub mod graph;
pub mod link;
pub mod node;
pub mod observer;
pub mod push;
pub mod scheduler;
pub mod sources;

#[cfg(test)]
mod tests;

pub use builder::{GraphBuilder, NodeHandle};
pub use clock::{EngineClock, EvaluationClock, EvaluationMode};
pub use engine::{EngineConfig, GraphEngine};
pub use graph::{EngineShared, EvalContext, Graph, OutputsView};
pub use link::{InputBinding, InputView, Link, LinkTarget};
pub use node::{Injectables, InputDecl, Node, NodeBody, NodeKind, NodeSignature, NodeState};
pub use observer::{LifecycleObserver, NodeProfile, ProfileObserver, TraceObserver};
pub use push::{PushEvent, PushInbox, PushSender};
pub use scheduler::NodeScheduler;
pub use sources::{pull_source_signature, push_source_signature, PullSourceBody, PushSourceBody};
