//! Owned value storage for every type kind.
//!
//! A `Value` is the kind-discriminated sum that a `TypeMeta` describes.
//! Scalars carry their payload inline; collections own specialised storage
//! structs that keep the slot discipline (sets/maps), ring layout (windows)
//! and reference payloads the overlay/delta machinery depends on.

pub mod bundle;
pub mod map_storage;
pub mod ops;
pub mod reference;
pub mod set_algebra;
pub mod set_storage;
pub mod window;

pub use bundle::BundleStorage;
pub use map_storage::MapStorage;
pub use reference::{OutputKey, RefValue};
pub use set_storage::{SetStorage, SlotId};
pub use window::WindowStorage;

use tickgraph_common::{GraphError, GraphErrorKind, ScalarValue};

use crate::type_meta::{TypeMeta, TypePayload};

/// One owned, typed value.
#[derive(Debug, Clone)]
pub enum Value {
    Scalar(ScalarValue),
    Tuple(Vec<Value>),
    Bundle(BundleStorage),
    List(Vec<Value>),
    Set(SetStorage),
    Map(MapStorage),
    Window(WindowStorage),
    Ref(RefValue),
}

impl Value {
    /// Construct the default value for a descriptor.
    pub fn new(meta: &'static TypeMeta) -> Value {
        meta.construct()
    }

    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            Value::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&SetStorage> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_set_mut(&mut self) -> Option<&mut SetStorage> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&MapStorage> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut MapStorage> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_window(&self) -> Option<&WindowStorage> {
        match self {
            Value::Window(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_window_mut(&mut self) -> Option<&mut WindowStorage> {
        match self {
            Value::Window(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_ref_value(&self) -> Option<&RefValue> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Expect a scalar, raising a schema error otherwise.
    pub fn expect_scalar(&self) -> Result<&ScalarValue, GraphError> {
        self.as_scalar().ok_or_else(|| {
            GraphError::new(GraphErrorKind::TypeMismatch).with_message("expected scalar value")
        })
    }

    /// Whether this value's variant matches the descriptor's kind. Shallow;
    /// the ops table performs the deep check during `copy_assign`.
    pub fn matches_kind(&self, meta: &TypeMeta) -> bool {
        matches!(
            (self, &meta.payload),
            (Value::Scalar(_), TypePayload::Scalar(_))
                | (Value::Tuple(_), TypePayload::Tuple { .. })
                | (Value::Bundle(_), TypePayload::Bundle { .. })
                | (Value::List(_), TypePayload::List { .. })
                | (Value::Set(_), TypePayload::Set { .. })
                | (Value::Map(_), TypePayload::Map { .. })
                | (Value::Window(_), TypePayload::Window { .. })
                | (Value::Ref(_), TypePayload::Ref { .. })
        )
    }
}

impl From<ScalarValue> for Value {
    fn from(s: ScalarValue) -> Self {
        Value::Scalar(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Scalar(ScalarValue::Int(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(ScalarValue::Float(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Scalar(ScalarValue::Bool(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Scalar(ScalarValue::Str(v.to_string()))
    }
}
