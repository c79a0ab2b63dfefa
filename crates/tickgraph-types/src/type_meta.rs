//! Interned, self-describing type descriptors.
//!
//! A `TypeMeta` is the immutable descriptor of one value shape: a scalar, a
//! tuple, a bundle of named fields, a list, a set, a map, a window or a
//! reference. Descriptors are structurally interned by the registry, so two
//! identically-shaped types resolve to the same `&'static TypeMeta` and
//! pointer equality doubles as type equality on the hot path.
//!
//! Each descriptor carries a `TypeOps` vtable of untyped operations over the
//! kind-discriminated [`Value`](crate::value::Value) sum. Capability flags
//! describe which of those operations are usable; gated operations return
//! `GraphErrorKind::NotCapable` rather than panicking.

use bitflags::bitflags;
use std::fmt;

use tickgraph_common::{EngineTimeDelta, GraphError, ScalarKind};

use crate::value::Value;

/// Classification of value shapes.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Scalar = 0,
    Tuple = 1,
    Bundle = 2,
    List = 3,
    Set = 4,
    Map = 5,
    Window = 6,
    Ref = 7,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TypeKind::Scalar => "scalar",
            TypeKind::Tuple => "tuple",
            TypeKind::Bundle => "bundle",
            TypeKind::List => "list",
            TypeKind::Set => "set",
            TypeKind::Map => "map",
            TypeKind::Window => "window",
            TypeKind::Ref => "ref",
        })
    }
}

bitflags! {
    /// Capability flags; they faithfully describe what the ops table can do.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct TypeFlags: u32 {
        const TRIVIALLY_CONSTRUCTIBLE = 1 << 0;
        const TRIVIALLY_DESTRUCTIBLE  = 1 << 1;
        const TRIVIALLY_COPYABLE      = 1 << 2;
        /// Contiguous numeric layout a host buffer protocol could expose.
        const BUFFER_COMPATIBLE       = 1 << 3;
        const HASHABLE                = 1 << 4;
        /// Supports `<` and `==`.
        const COMPARABLE              = 1 << 5;
        /// Supports `==`.
        const EQUATABLE               = 1 << 6;
    }
}

/// One declared field of a bundle type.
#[derive(Debug, Clone)]
pub struct FieldMeta {
    pub name: String,
    pub ty: &'static TypeMeta,
}

/// Bounding rule for window storage.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum WindowSpec {
    /// Keep the most recent `n` elements.
    Ticks(usize),
    /// Keep elements younger than the duration.
    Duration(EngineTimeDelta),
}

/// Kind-specific payload of a descriptor.
#[derive(Debug, Clone)]
pub enum TypePayload {
    Scalar(ScalarKind),
    Tuple { items: Vec<&'static TypeMeta> },
    Bundle { fields: Vec<FieldMeta> },
    List { elem: &'static TypeMeta, fixed_len: Option<usize> },
    Set { elem: &'static TypeMeta },
    Map { key: &'static TypeMeta, value: &'static TypeMeta },
    Window { elem: &'static TypeMeta, spec: WindowSpec },
    Ref { target: &'static TypeMeta },
}

/// Host-object representation used by the optional converter slots.
///
/// The core carries the converter hooks but no binding layer; a JSON value is
/// the neutral interchange shape a host adapter can map from.
pub type HostValue = serde_json::Value;

/// Function-pointer table of untyped operations for one descriptor.
///
/// All functions receive the owning `TypeMeta` for context, mirroring the
/// kind dispatch a caller would otherwise repeat at every site.
pub struct TypeOps {
    pub construct: fn(&'static TypeMeta) -> Value,
    pub copy_assign: fn(&TypeMeta, &mut Value, &Value) -> Result<(), GraphError>,
    pub equals: fn(&TypeMeta, &Value, &Value) -> Result<bool, GraphError>,
    pub less_than: fn(&TypeMeta, &Value, &Value) -> Result<bool, GraphError>,
    pub hash: fn(&TypeMeta, &Value) -> Result<u64, GraphError>,

    // Host interop (optional - absent converters leave the value opaque)
    pub to_host: Option<fn(&TypeMeta, &Value) -> HostValue>,
    pub from_host: Option<fn(&'static TypeMeta, &HostValue) -> Result<Value, GraphError>>,
}

/// Complete metadata for one type. Interned; lifetime is the registry's.
pub struct TypeMeta {
    pub kind: TypeKind,
    pub flags: TypeFlags,
    pub payload: TypePayload,
    /// Human-readable rendering, e.g. `set[int]` or `bundle{bid:float,ask:float}`.
    pub name: String,
    /// Structural hash this descriptor was interned under.
    pub structural_hash: u64,
    pub ops: &'static TypeOps,
}

impl fmt::Debug for TypeMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMeta")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("flags", &self.flags)
            .finish()
    }
}

impl TypeMeta {
    #[inline]
    pub fn is_hashable(&self) -> bool {
        self.flags.contains(TypeFlags::HASHABLE)
    }

    #[inline]
    pub fn is_comparable(&self) -> bool {
        self.flags.contains(TypeFlags::COMPARABLE)
    }

    #[inline]
    pub fn is_equatable(&self) -> bool {
        self.flags.contains(TypeFlags::EQUATABLE)
    }

    #[inline]
    pub fn is_trivially_copyable(&self) -> bool {
        self.flags.contains(TypeFlags::TRIVIALLY_COPYABLE)
    }

    /// Construct the default (invalid-until-written) value for this type.
    #[inline]
    pub fn construct(&'static self) -> Value {
        (self.ops.construct)(self)
    }

    pub fn copy_assign(&self, dest: &mut Value, src: &Value) -> Result<(), GraphError> {
        (self.ops.copy_assign)(self, dest, src)
    }

    pub fn equals(&self, a: &Value, b: &Value) -> Result<bool, GraphError> {
        (self.ops.equals)(self, a, b)
    }

    pub fn less_than(&self, a: &Value, b: &Value) -> Result<bool, GraphError> {
        (self.ops.less_than)(self, a, b)
    }

    pub fn hash_value(&self, v: &Value) -> Result<u64, GraphError> {
        (self.ops.hash)(self, v)
    }

    pub fn to_host(&self, v: &Value) -> Option<HostValue> {
        self.ops.to_host.map(|f| f(self, v))
    }

    pub fn from_host(&'static self, host: &HostValue) -> Result<Value, GraphError> {
        match self.ops.from_host {
            Some(f) => f(self, host),
            None => Err(GraphError::not_capable("host-converter")),
        }
    }

    // Payload accessors; callers that know the kind reach through these.

    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self.payload {
            TypePayload::Scalar(k) => Some(k),
            _ => None,
        }
    }

    pub fn element_type(&self) -> Option<&'static TypeMeta> {
        match self.payload {
            TypePayload::List { elem, .. }
            | TypePayload::Set { elem }
            | TypePayload::Window { elem, .. } => Some(elem),
            _ => None,
        }
    }

    pub fn map_types(&self) -> Option<(&'static TypeMeta, &'static TypeMeta)> {
        match self.payload {
            TypePayload::Map { key, value } => Some((key, value)),
            _ => None,
        }
    }

    pub fn fields(&self) -> Option<&[FieldMeta]> {
        match &self.payload {
            TypePayload::Bundle { fields } => Some(fields),
            _ => None,
        }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields()?.iter().position(|f| f.name == name)
    }

    pub fn window_spec(&self) -> Option<WindowSpec> {
        match self.payload {
            TypePayload::Window { spec, .. } => Some(spec),
            _ => None,
        }
    }

    pub fn ref_target(&self) -> Option<&'static TypeMeta> {
        match self.payload {
            TypePayload::Ref { target } => Some(target),
            _ => None,
        }
    }
}

/// Pointer identity is type identity for interned descriptors.
#[inline]
pub fn same_type(a: &'static TypeMeta, b: &'static TypeMeta) -> bool {
    std::ptr::eq(a, b)
}
