//! Runtime error representation shared by every tickgraph layer.
//!
//! - **`GraphErrorKind`** : the canonical error taxonomy
//! - **`ErrorContext`**   : lightweight node/path location info
//! - **`GraphErrorExtra`**: per-kind "extension slot"
//! - **`GraphError`**     : one struct that glues the three together
//!
//! When a future error needs its own payload, add another variant to
//! `GraphErrorExtra`; existing code does not break.

use std::{error::Error, fmt};

/// All recognised runtime error kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum GraphErrorKind {
    /// Binding an input to an incompatible output, or applying a value of
    /// the wrong schema.
    TypeMismatch,
    /// Navigating through a reference that is empty or dangling.
    UnboundReference,
    /// Scheduling with a tag already in use where replace is forbidden.
    ScheduleConflict,
    /// Graph construction would exceed the sized arena.
    ArenaOverflow,
    /// A node evaluation function failed.
    NodeEval,
    /// Monotonicity broken or internal bookkeeping corrupted.
    InvariantViolation,
    /// A named node, field, key or tag does not exist.
    NotFound,
    /// An operation required a capability the type's flags do not carry.
    NotCapable,
    /// The engine has stopped and cannot accept further work.
    Stopped,
}

impl fmt::Display for GraphErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TypeMismatch => "type-mismatch",
            Self::UnboundReference => "unbound-reference",
            Self::ScheduleConflict => "schedule-conflict",
            Self::ArenaOverflow => "arena-overflow",
            Self::NodeEval => "node-eval",
            Self::InvariantViolation => "invariant-violation",
            Self::NotFound => "not-found",
            Self::NotCapable => "not-capable",
            Self::Stopped => "stopped",
        })
    }
}

/// Generic, lightweight metadata that any error may carry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ErrorContext {
    /// Index of the node the error was raised in or on behalf of.
    pub node: Option<u32>,
    /// Navigation path from the node's root position, rendered `a.b[2]`.
    pub path: Option<String>,
}

/// Kind-specific payloads ("extension slot").
///
/// Only variants that need extra data get it; the rest stay at `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum GraphErrorExtra {
    /// No additional payload (the vast majority of errors).
    #[default]
    None,

    /// `NotCapable` – the capability flag the operation required.
    Capability { required: &'static str },

    /// `ScheduleConflict` – the offending tag.
    Tag { tag: String },
}

/// The single error struct the runtime passes around.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphError {
    pub kind: GraphErrorKind,
    pub message: Option<String>,
    pub context: Option<ErrorContext>,
    pub extra: GraphErrorExtra,
}

/* ───────────────────── Constructors & helpers ─────────────────────── */

impl From<GraphErrorKind> for GraphError {
    fn from(kind: GraphErrorKind) -> Self {
        Self {
            kind,
            message: None,
            context: None,
            extra: GraphErrorExtra::None,
        }
    }
}

impl GraphError {
    pub fn new(kind: GraphErrorKind) -> Self {
        kind.into()
    }

    /// Attach a human-readable explanation.
    pub fn with_message<S: Into<String>>(mut self, msg: S) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Attach the node the error belongs to.
    pub fn with_node(mut self, node: u32) -> Self {
        self.context.get_or_insert_with(ErrorContext::default).node = Some(node);
        self
    }

    /// Attach the navigation path the error was raised at.
    pub fn with_path<S: Into<String>>(mut self, path: S) -> Self {
        self.context.get_or_insert_with(ErrorContext::default).path = Some(path.into());
        self
    }

    /// Attach kind-specific extra data.
    pub fn with_extra(mut self, extra: GraphErrorExtra) -> Self {
        self.extra = extra;
        self
    }

    pub fn not_capable(required: &'static str) -> Self {
        Self::new(GraphErrorKind::NotCapable).with_extra(GraphErrorExtra::Capability { required })
    }
}

/* ───────────────────────── Display / Error ────────────────────────── */

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;

        if let Some(ref msg) = self.message {
            write!(f, ": {msg}")?;
        }

        if let Some(ref ctx) = self.context {
            if let Some(node) = ctx.node {
                write!(f, " (node {node})")?;
            }
            if let Some(ref path) = ctx.path {
                write!(f, " [at {path}]")?;
            }
        }

        match &self.extra {
            GraphErrorExtra::None => {}
            GraphErrorExtra::Capability { required } => write!(f, " [requires {required}]")?,
            GraphErrorExtra::Tag { tag } => write!(f, " [tag {tag}]")?,
        }

        Ok(())
    }
}

impl Error for GraphError {}

impl From<GraphError> for String {
    fn from(error: GraphError) -> Self {
        format!("{error}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = GraphError::new(GraphErrorKind::UnboundReference)
            .with_message("reference target gone")
            .with_node(7)
            .with_path("prices[3]");
        let text = err.to_string();
        assert!(text.contains("unbound-reference"));
        assert!(text.contains("node 7"));
        assert!(text.contains("prices[3]"));
    }

    #[test]
    fn capability_extra_renders() {
        let err = GraphError::not_capable("Hashable");
        assert!(err.to_string().contains("requires Hashable"));
    }
}
