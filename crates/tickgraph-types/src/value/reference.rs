//! Reference values: pointers to another node's output by stable identity.
//!
//! A peered reference names an output id plus an index path inside it; it
//! never owns the referenced data. Composite references carry one reference
//! per element of a composite shape (used when a reference output is built
//! from per-field references).

use crate::path::{Path, PathSeg};

/// Stable identifier of an output in the graph arena. Assigned once at
/// graph construction; valid until arena teardown.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputKey(pub u32);

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RefValue {
    /// No target; dereferencing yields an invalid view.
    #[default]
    Empty,
    /// Direct binding to an output position.
    Peered { output: OutputKey, path: Path },
    /// One reference per element of a composite shape.
    Composite(Vec<RefValue>),
}

impl RefValue {
    pub fn peered(output: OutputKey) -> Self {
        RefValue::Peered { output, path: Path::new() }
    }

    pub fn peered_at(output: OutputKey, path: impl IntoIterator<Item = PathSeg>) -> Self {
        RefValue::Peered { output, path: path.into_iter().collect() }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, RefValue::Empty)
    }

    #[inline]
    pub fn is_peered(&self) -> bool {
        matches!(self, RefValue::Peered { .. })
    }

    /// The directly-peered target, if any.
    pub fn target(&self) -> Option<(OutputKey, &[PathSeg])> {
        match self {
            RefValue::Peered { output, path } => Some((*output, path)),
            _ => None,
        }
    }

    pub fn items(&self) -> Option<&[RefValue]> {
        match self {
            RefValue::Composite(items) => Some(items),
            _ => None,
        }
    }
}
