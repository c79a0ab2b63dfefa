//! Static `TypeOps` tables, one per type kind.
//!
//! The registry stamps every interned descriptor with the table matching its
//! kind; callers go through the `TypeMeta` wrappers rather than these
//! functions directly. Capability-gated operations check the descriptor's
//! flags and surface `NotCapable` instead of panicking.

use tickgraph_common::{GraphError, GraphErrorKind, ScalarValue};

use crate::type_meta::{HostValue, TypeMeta, TypeOps, TypePayload};
use crate::value::set_storage::hash_key;
use crate::value::{
    BundleStorage, MapStorage, RefValue, SetStorage, Value, WindowStorage,
};

fn schema_error(meta: &TypeMeta, what: &str) -> GraphError {
    GraphError::new(GraphErrorKind::TypeMismatch)
        .with_message(format!("{what} does not match schema {}", meta.name))
}

fn require_flag(meta: &TypeMeta, ok: bool, required: &'static str) -> Result<(), GraphError> {
    if ok {
        Ok(())
    } else {
        Err(GraphError::not_capable(required).with_message(meta.name.clone()))
    }
}

/* ───────────────────────── construct ──────────────────────────────── */

fn construct(meta: &'static TypeMeta) -> Value {
    match &meta.payload {
        TypePayload::Scalar(kind) => Value::Scalar(ScalarValue::default_for(*kind)),
        TypePayload::Tuple { items } => {
            Value::Tuple(items.iter().map(|m| m.construct()).collect())
        }
        TypePayload::Bundle { fields } => Value::Bundle(BundleStorage::new(
            fields.iter().map(|f| f.ty.construct()).collect(),
        )),
        TypePayload::List { elem, fixed_len } => {
            let n = fixed_len.unwrap_or(0);
            Value::List((0..n).map(|_| elem.construct()).collect())
        }
        TypePayload::Set { .. } => Value::Set(SetStorage::new()),
        TypePayload::Map { .. } => Value::Map(MapStorage::new()),
        TypePayload::Window { spec, .. } => Value::Window(WindowStorage::new(*spec)),
        TypePayload::Ref { .. } => Value::Ref(RefValue::Empty),
    }
}

/* ───────────────────────── copy_assign ────────────────────────────── */

fn copy_assign(meta: &TypeMeta, dest: &mut Value, src: &Value) -> Result<(), GraphError> {
    if !src.matches_kind(meta) {
        return Err(schema_error(meta, "assigned value"));
    }
    if let (TypePayload::Scalar(kind), Value::Scalar(s)) = (&meta.payload, src) {
        if s.kind() != *kind {
            return Err(schema_error(meta, "assigned scalar"));
        }
    }
    *dest = src.clone();
    Ok(())
}

/* ───────────────────────── equals ─────────────────────────────────── */

fn equals(meta: &TypeMeta, a: &Value, b: &Value) -> Result<bool, GraphError> {
    require_flag(meta, meta.is_equatable(), "Equatable")?;
    equals_unchecked(meta, a, b)
}

fn equals_unchecked(meta: &TypeMeta, a: &Value, b: &Value) -> Result<bool, GraphError> {
    match (&meta.payload, a, b) {
        (TypePayload::Scalar(_), Value::Scalar(x), Value::Scalar(y)) => Ok(x == y),
        (TypePayload::Tuple { items }, Value::Tuple(x), Value::Tuple(y)) => {
            if x.len() != items.len() || y.len() != items.len() {
                return Err(schema_error(meta, "tuple arity"));
            }
            for (m, (xv, yv)) in items.iter().zip(x.iter().zip(y.iter())) {
                if !equals_unchecked(m, xv, yv)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (TypePayload::Bundle { fields }, Value::Bundle(x), Value::Bundle(y)) => {
            for (i, f) in fields.iter().enumerate() {
                let (xv, yv) = match (x.field(i), y.field(i)) {
                    (Some(a), Some(b)) => (a, b),
                    _ => return Err(schema_error(meta, "bundle arity")),
                };
                if !equals_unchecked(f.ty, xv, yv)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (TypePayload::List { elem, .. }, Value::List(x), Value::List(y)) => {
            if x.len() != y.len() {
                return Ok(false);
            }
            for (xv, yv) in x.iter().zip(y.iter()) {
                if !equals_unchecked(elem, xv, yv)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (TypePayload::Set { .. }, Value::Set(x), Value::Set(y)) => {
            if x.len() != y.len() {
                return Ok(false);
            }
            Ok(x.iter().all(|(_, k)| y.contains(k)))
        }
        (TypePayload::Map { value, .. }, Value::Map(x), Value::Map(y)) => {
            if x.len() != y.len() {
                return Ok(false);
            }
            for (_, k, xv) in x.iter() {
                match y.get(k) {
                    Some(yv) if equals_unchecked(value, xv, yv)? => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        (TypePayload::Window { .. }, Value::Window(x), Value::Window(y)) => {
            Ok(x.spec() == y.spec() && x.values() == y.values())
        }
        (TypePayload::Ref { .. }, Value::Ref(x), Value::Ref(y)) => Ok(x == y),
        _ => Err(schema_error(meta, "compared value")),
    }
}

/* ───────────────────────── less_than ──────────────────────────────── */

fn less_than(meta: &TypeMeta, a: &Value, b: &Value) -> Result<bool, GraphError> {
    require_flag(meta, meta.is_comparable(), "Comparable")?;
    less_than_unchecked(meta, a, b)
}

fn less_than_unchecked(meta: &TypeMeta, a: &Value, b: &Value) -> Result<bool, GraphError> {
    match (&meta.payload, a, b) {
        (TypePayload::Scalar(_), Value::Scalar(x), Value::Scalar(y)) => x
            .cmp_same_kind(y)
            .map(|o| o == std::cmp::Ordering::Less)
            .ok_or_else(|| schema_error(meta, "compared scalar")),
        (TypePayload::Tuple { items }, Value::Tuple(x), Value::Tuple(y)) => {
            for (m, (xv, yv)) in items.iter().zip(x.iter().zip(y.iter())) {
                if less_than_unchecked(m, xv, yv)? {
                    return Ok(true);
                }
                if less_than_unchecked(m, yv, xv)? {
                    return Ok(false);
                }
            }
            Ok(false)
        }
        _ => Err(schema_error(meta, "compared value")),
    }
}

/* ───────────────────────── hash ───────────────────────────────────── */

use crate::registry::hash_combine;

fn hash(meta: &TypeMeta, v: &Value) -> Result<u64, GraphError> {
    require_flag(meta, meta.is_hashable(), "Hashable")?;
    match (&meta.payload, v) {
        (TypePayload::Scalar(_), Value::Scalar(s)) => Ok(hash_key(s)),
        (TypePayload::Tuple { items }, Value::Tuple(vs)) => {
            let mut h = 0u64;
            for (m, v) in items.iter().zip(vs.iter()) {
                h = hash_combine(h, m.hash_value(v)?);
            }
            Ok(h)
        }
        _ => Err(schema_error(meta, "hashed value")),
    }
}

/* ───────────────────────── host interop ───────────────────────────── */

fn to_host(meta: &TypeMeta, v: &Value) -> HostValue {
    match (&meta.payload, v) {
        (TypePayload::Scalar(_), Value::Scalar(s)) => scalar_to_host(s),
        (TypePayload::Tuple { items }, Value::Tuple(vs)) => HostValue::Array(
            items.iter().zip(vs.iter()).map(|(m, v)| to_host(m, v)).collect(),
        ),
        (TypePayload::Bundle { fields }, Value::Bundle(b)) => {
            let mut obj = serde_json::Map::new();
            for (i, f) in fields.iter().enumerate() {
                if let Some(v) = b.field(i) {
                    obj.insert(f.name.clone(), to_host(f.ty, v));
                }
            }
            HostValue::Object(obj)
        }
        (TypePayload::List { elem, .. }, Value::List(vs)) => {
            HostValue::Array(vs.iter().map(|v| to_host(elem, v)).collect())
        }
        (TypePayload::Set { .. }, Value::Set(s)) => {
            HostValue::Array(s.iter().map(|(_, k)| scalar_to_host(k)).collect())
        }
        (TypePayload::Map { value, .. }, Value::Map(m)) => {
            let mut obj = serde_json::Map::new();
            for (_, k, v) in m.iter() {
                obj.insert(k.to_string(), to_host(value, v));
            }
            HostValue::Object(obj)
        }
        (TypePayload::Window { .. }, Value::Window(w)) => {
            HostValue::Array(w.values().iter().map(scalar_to_host).collect())
        }
        (TypePayload::Ref { .. }, Value::Ref(r)) => match r.target() {
            Some((output, _)) => HostValue::from(output.0),
            None => HostValue::Null,
        },
        _ => HostValue::Null,
    }
}

fn scalar_to_host(s: &ScalarValue) -> HostValue {
    match s {
        ScalarValue::Bool(b) => HostValue::from(*b),
        ScalarValue::Int(i) => HostValue::from(*i),
        ScalarValue::Float(n) => {
            serde_json::Number::from_f64(*n).map(HostValue::Number).unwrap_or(HostValue::Null)
        }
        ScalarValue::Str(s) => HostValue::from(s.clone()),
        ScalarValue::Time(t) => HostValue::from(t.micros()),
        ScalarValue::Duration(d) => HostValue::from(d.micros()),
    }
}

fn scalar_from_host(meta: &'static TypeMeta, host: &HostValue) -> Result<Value, GraphError> {
    use tickgraph_common::{EngineTime, EngineTimeDelta, ScalarKind};
    let kind = meta
        .scalar_kind()
        .ok_or_else(|| schema_error(meta, "host value"))?;
    let scalar = match (kind, host) {
        (ScalarKind::Bool, HostValue::Bool(b)) => ScalarValue::Bool(*b),
        (ScalarKind::Int, HostValue::Number(n)) => {
            ScalarValue::Int(n.as_i64().ok_or_else(|| schema_error(meta, "host number"))?)
        }
        (ScalarKind::Float, HostValue::Number(n)) => {
            ScalarValue::Float(n.as_f64().ok_or_else(|| schema_error(meta, "host number"))?)
        }
        (ScalarKind::Str, HostValue::String(s)) => ScalarValue::Str(s.clone()),
        (ScalarKind::Time, HostValue::Number(n)) => ScalarValue::Time(EngineTime::from_micros(
            n.as_i64().ok_or_else(|| schema_error(meta, "host number"))?,
        )),
        (ScalarKind::Duration, HostValue::Number(n)) => {
            ScalarValue::Duration(EngineTimeDelta::from_micros(
                n.as_i64().ok_or_else(|| schema_error(meta, "host number"))?,
            ))
        }
        _ => return Err(schema_error(meta, "host value")),
    };
    Ok(Value::Scalar(scalar))
}

/* ───────────────────────── vtables ────────────────────────────────── */

pub static SCALAR_OPS: TypeOps = TypeOps {
    construct,
    copy_assign,
    equals,
    less_than,
    hash,
    to_host: Some(to_host),
    from_host: Some(scalar_from_host),
};

/// Composite kinds share the dispatching implementations; only the scalar
/// table carries a host importer.
pub static COMPOSITE_OPS: TypeOps = TypeOps {
    construct,
    copy_assign,
    equals,
    less_than,
    hash,
    to_host: Some(to_host),
    from_host: None,
};
