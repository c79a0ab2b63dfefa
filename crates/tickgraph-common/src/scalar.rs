use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};

use crate::{EngineTime, EngineTimeDelta};

/// The closed set of scalar kinds the runtime understands.
///
/// Collection and bundle shapes are composed from these leaves by the type
/// registry; there is no open-ended user scalar in the core.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    Int,
    Float,
    Str,
    Time,
    Duration,
}

impl Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
            ScalarKind::Str => "str",
            ScalarKind::Time => "time",
            ScalarKind::Duration => "duration",
        })
    }
}

/// A single scalar payload carried at a time-series leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Time(EngineTime),
    Duration(EngineTimeDelta),
}

impl ScalarValue {
    #[inline]
    pub fn kind(&self) -> ScalarKind {
        match self {
            ScalarValue::Bool(_) => ScalarKind::Bool,
            ScalarValue::Int(_) => ScalarKind::Int,
            ScalarValue::Float(_) => ScalarKind::Float,
            ScalarValue::Str(_) => ScalarKind::Str,
            ScalarValue::Time(_) => ScalarKind::Time,
            ScalarValue::Duration(_) => ScalarKind::Duration,
        }
    }

    /// The zero value used when a position is constructed before first write.
    pub fn default_for(kind: ScalarKind) -> ScalarValue {
        match kind {
            ScalarKind::Bool => ScalarValue::Bool(false),
            ScalarKind::Int => ScalarValue::Int(0),
            ScalarKind::Float => ScalarValue::Float(0.0),
            ScalarKind::Str => ScalarValue::Str(String::new()),
            ScalarKind::Time => ScalarValue::Time(crate::MIN_DT),
            ScalarKind::Duration => ScalarValue::Duration(EngineTimeDelta::ZERO),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            ScalarValue::Bool(b) => *b,
            ScalarValue::Int(i) => *i != 0,
            ScalarValue::Float(n) => *n != 0.0,
            ScalarValue::Str(s) => !s.is_empty(),
            ScalarValue::Time(t) => !t.is_min(),
            ScalarValue::Duration(d) => d.micros() != 0,
        }
    }

    /// Numeric reading where one exists; `None` for strings.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ScalarValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            ScalarValue::Int(i) => Some(*i as f64),
            ScalarValue::Float(n) => Some(*n),
            ScalarValue::Time(t) => Some(t.micros() as f64),
            ScalarValue::Duration(d) => Some(d.micros() as f64),
            ScalarValue::Str(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScalarValue::Bool(b) => Some(*b as i64),
            ScalarValue::Int(i) => Some(*i),
            ScalarValue::Float(n) => Some(*n as i64),
            ScalarValue::Time(t) => Some(t.micros()),
            ScalarValue::Duration(d) => Some(d.micros()),
            ScalarValue::Str(_) => None,
        }
    }

    /// Total order within a kind. Cross-kind comparison is a wiring error and
    /// is rejected by the caller before reaching here.
    pub fn cmp_same_kind(&self, other: &ScalarValue) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (ScalarValue::Bool(a), ScalarValue::Bool(b)) => Some(a.cmp(b)),
            (ScalarValue::Int(a), ScalarValue::Int(b)) => Some(a.cmp(b)),
            (ScalarValue::Float(a), ScalarValue::Float(b)) => a.partial_cmp(b),
            (ScalarValue::Str(a), ScalarValue::Str(b)) => Some(a.cmp(b)),
            (ScalarValue::Time(a), ScalarValue::Time(b)) => Some(a.cmp(b)),
            (ScalarValue::Duration(a), ScalarValue::Duration(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            ScalarValue::Bool(b) => b.hash(state),
            ScalarValue::Int(i) => i.hash(state),
            ScalarValue::Float(n) => n.to_bits().hash(state),
            ScalarValue::Str(s) => s.hash(state),
            ScalarValue::Time(t) => t.hash(state),
            ScalarValue::Duration(d) => d.hash(state),
        }
    }
}

impl Eq for ScalarValue {}

impl Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bool(b) => write!(f, "{b}"),
            ScalarValue::Int(i) => write!(f, "{i}"),
            ScalarValue::Float(n) => write!(f, "{n}"),
            ScalarValue::Str(s) => write!(f, "{s}"),
            ScalarValue::Time(t) => write!(f, "{t}"),
            ScalarValue::Duration(d) => write!(f, "{d}"),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Bool(v)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Str(v.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        ScalarValue::Str(v)
    }
}

impl From<EngineTime> for ScalarValue {
    fn from(v: EngineTime) -> Self {
        ScalarValue::Time(v)
    }
}

impl From<EngineTimeDelta> for ScalarValue {
    fn from(v: EngineTimeDelta) -> Self {
        ScalarValue::Duration(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(v: &ScalarValue) -> u64 {
        let mut h = DefaultHasher::new();
        v.hash(&mut h);
        h.finish()
    }

    #[test]
    fn float_hash_uses_bit_pattern() {
        assert_eq!(
            hash_of(&ScalarValue::Float(1.5)),
            hash_of(&ScalarValue::Float(1.5))
        );
        assert_ne!(
            hash_of(&ScalarValue::Float(0.0)),
            hash_of(&ScalarValue::Float(-0.0))
        );
    }

    #[test]
    fn cross_kind_comparison_is_rejected() {
        assert!(ScalarValue::Int(1)
            .cmp_same_kind(&ScalarValue::Float(1.0))
            .is_none());
    }

    #[test]
    fn defaults_match_kind() {
        for kind in [
            ScalarKind::Bool,
            ScalarKind::Int,
            ScalarKind::Float,
            ScalarKind::Str,
            ScalarKind::Time,
            ScalarKind::Duration,
        ] {
            assert_eq!(ScalarValue::default_for(kind).kind(), kind);
        }
    }
}
