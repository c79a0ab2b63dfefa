//! Navigation paths through time-series shapes.

use smallvec::SmallVec;
use std::fmt::{self, Display};

/// One navigation step from a composite position to a child.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PathSeg {
    /// Bundle field, by declaration index.
    Field(u16),
    /// List element, by position.
    Item(u32),
    /// Dict element, by stable slot.
    Slot(u32),
}

/// A path from a root position down to a nested one. Short in practice;
/// inline storage covers the common depth.
pub type Path = SmallVec<[PathSeg; 4]>;

/// Render a path for diagnostics: `.<field>[item]{slot}` segments.
pub fn render_path(path: &[PathSeg]) -> String {
    let mut out = String::new();
    for seg in path {
        match seg {
            PathSeg::Field(i) => {
                out.push('.');
                out.push_str(&i.to_string());
            }
            PathSeg::Item(i) => {
                out.push('[');
                out.push_str(&i.to_string());
                out.push(']');
            }
            PathSeg::Slot(s) => {
                out.push('{');
                out.push_str(&s.to_string());
                out.push('}');
            }
        }
    }
    if out.is_empty() {
        out.push('.');
    }
    out
}

/// Wrapper giving paths a `Display` without allocating at call sites.
pub struct PathDisplay<'a>(pub &'a [PathSeg]);

impl Display for PathDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render_path(self.0))
    }
}
