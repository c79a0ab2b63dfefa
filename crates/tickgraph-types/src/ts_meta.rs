//! Time-series descriptors: the parallel tree over `TypeMeta`.
//!
//! A `TsMeta` describes the time-series shape of a position: a plain scalar
//! series (TS), a bundle of named series (TSB), a fixed list (TSL), a keyed
//! dict (TSD), a tracked set (TSS), a history window (TSW), a reference
//! (REF) or a value-less tick (SIGNAL).
//!
//! Each descriptor derives and caches the `TypeMeta` of its user-visible
//! value storage at intern time. The time/observer/delta shapes the storage
//! mirrors are realised structurally by [`Overlay`](crate::overlay::Overlay)
//! rather than as separate schemas.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Mutex;

use tickgraph_common::{EngineTimeDelta, GraphError, ScalarKind};

use crate::registry::{hash_combine, registry};
use crate::type_meta::{TypeMeta, WindowSpec};

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TsKind {
    /// Scalar time-series.
    Ts = 0,
    /// Bundle of named child series.
    Tsb = 1,
    /// Fixed-size list of child series.
    Tsl = 2,
    /// Keyed dict of child series.
    Tsd = 3,
    /// Tracked set of scalar elements.
    Tss = 4,
    /// Bounded history window of scalar elements.
    Tsw = 5,
    /// Reference to another output.
    Ref = 6,
    /// Tick-only series with no value.
    Signal = 7,
}

impl fmt::Display for TsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TsKind::Ts => "TS",
            TsKind::Tsb => "TSB",
            TsKind::Tsl => "TSL",
            TsKind::Tsd => "TSD",
            TsKind::Tss => "TSS",
            TsKind::Tsw => "TSW",
            TsKind::Ref => "REF",
            TsKind::Signal => "SIGNAL",
        })
    }
}

#[derive(Debug, Clone)]
pub struct TsField {
    pub name: String,
    pub meta: &'static TsMeta,
}

#[derive(Debug, Clone)]
pub enum TsPayload {
    Scalar { value_type: &'static TypeMeta },
    Bundle { fields: Vec<TsField> },
    List { elem: &'static TsMeta, len: usize },
    Dict { key: &'static TypeMeta, value: &'static TsMeta },
    Set { elem: &'static TypeMeta },
    Window { elem: &'static TypeMeta, spec: WindowSpec },
    Ref { target: &'static TsMeta },
    Signal,
}

/// Interned time-series descriptor. Lifetime is the registry's.
pub struct TsMeta {
    pub kind: TsKind,
    pub payload: TsPayload,
    pub name: String,
    pub structural_hash: u64,
    /// Schema of the user-visible value storage, derived at intern time.
    pub value_schema: &'static TypeMeta,
}

impl fmt::Debug for TsMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsMeta")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .finish()
    }
}

impl TsMeta {
    /// Whether positions of this kind carry a delta tracker.
    pub fn has_delta(&self) -> bool {
        matches!(self.kind, TsKind::Tss | TsKind::Tsd | TsKind::Tsb | TsKind::Tsl)
    }

    pub fn fields(&self) -> Option<&[TsField]> {
        match &self.payload {
            TsPayload::Bundle { fields } => Some(fields),
            _ => None,
        }
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields()?.iter().position(|f| f.name == name)
    }

    pub fn field_meta(&self, index: usize) -> Option<&'static TsMeta> {
        Some(self.fields()?.get(index)?.meta)
    }

    pub fn list_elem(&self) -> Option<(&'static TsMeta, usize)> {
        match self.payload {
            TsPayload::List { elem, len } => Some((elem, len)),
            _ => None,
        }
    }

    pub fn dict_types(&self) -> Option<(&'static TypeMeta, &'static TsMeta)> {
        match self.payload {
            TsPayload::Dict { key, value } => Some((key, value)),
            _ => None,
        }
    }

    pub fn ref_target(&self) -> Option<&'static TsMeta> {
        match self.payload {
            TsPayload::Ref { target } => Some(target),
            _ => None,
        }
    }

    /// The child series meta at a navigation step, where one exists.
    pub fn child_at_field(&self, index: usize) -> Option<&'static TsMeta> {
        self.field_meta(index)
    }

    pub fn child_elem(&self) -> Option<&'static TsMeta> {
        match self.payload {
            TsPayload::List { elem, .. } => Some(elem),
            TsPayload::Dict { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Pointer identity is descriptor identity.
#[inline]
pub fn same_ts_meta(a: &'static TsMeta, b: &'static TsMeta) -> bool {
    std::ptr::eq(a, b)
}

static TS_REGISTRY: Lazy<Mutex<FxHashMap<u64, &'static TsMeta>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

fn intern(key: u64, make: impl FnOnce() -> TsMeta) -> &'static TsMeta {
    let mut map = TS_REGISTRY.lock().expect("ts registry poisoned");
    if let Some(existing) = map.get(&key) {
        return existing;
    }
    let leaked: &'static TsMeta = Box::leak(Box::new(make()));
    map.insert(key, leaked);
    leaked
}

/// TS[T]: scalar time-series over a value type.
pub fn ts(value_type: &'static TypeMeta) -> &'static TsMeta {
    let key = hash_combine(TsKind::Ts as u64 + 0x100, value_type.structural_hash);
    intern(key, || TsMeta {
        kind: TsKind::Ts,
        name: format!("TS[{}]", value_type.name),
        payload: TsPayload::Scalar { value_type },
        structural_hash: key,
        value_schema: value_type,
    })
}

/// TSB{...}: bundle of named child series in declaration order.
pub fn tsb(fields: Vec<(String, &'static TsMeta)>) -> &'static TsMeta {
    let key = fields.iter().fold(TsKind::Tsb as u64 + 0x200, |h, (n, m)| {
        hash_combine(hash_combine(h, str_hash(n)), m.structural_hash)
    });
    intern(key, || {
        let value_schema = registry().bundle(
            fields
                .iter()
                .map(|(n, m)| (n.clone(), m.value_schema))
                .collect(),
        );
        let name = format!(
            "TSB{{{}}}",
            fields
                .iter()
                .map(|(n, m)| format!("{n}:{}", m.name))
                .collect::<Vec<_>>()
                .join(",")
        );
        TsMeta {
            kind: TsKind::Tsb,
            payload: TsPayload::Bundle {
                fields: fields
                    .into_iter()
                    .map(|(name, meta)| TsField { name, meta })
                    .collect(),
            },
            name,
            structural_hash: key,
            value_schema,
        }
    })
}

/// TSL[T; n]: fixed-size list of child series.
pub fn tsl(elem: &'static TsMeta, len: usize) -> &'static TsMeta {
    let key = hash_combine(
        hash_combine(TsKind::Tsl as u64 + 0x300, elem.structural_hash),
        len as u64,
    );
    intern(key, || TsMeta {
        kind: TsKind::Tsl,
        name: format!("TSL[{};{len}]", elem.name),
        value_schema: registry().fixed_list(elem.value_schema, len),
        payload: TsPayload::List { elem, len },
        structural_hash: key,
    })
}

/// TSD[K, V]: keyed dict of child series.
pub fn tsd(
    key_type: &'static TypeMeta,
    value: &'static TsMeta,
) -> Result<&'static TsMeta, GraphError> {
    let schema = registry().map(key_type, value.value_schema)?;
    let key = hash_combine(
        hash_combine(TsKind::Tsd as u64 + 0x400, key_type.structural_hash),
        value.structural_hash,
    );
    Ok(intern(key, || TsMeta {
        kind: TsKind::Tsd,
        name: format!("TSD[{},{}]", key_type.name, value.name),
        payload: TsPayload::Dict { key: key_type, value },
        structural_hash: key,
        value_schema: schema,
    }))
}

/// TSS[T]: tracked set of scalar elements.
pub fn tss(elem: &'static TypeMeta) -> Result<&'static TsMeta, GraphError> {
    let schema = registry().set(elem)?;
    let key = hash_combine(TsKind::Tss as u64 + 0x500, elem.structural_hash);
    Ok(intern(key, || TsMeta {
        kind: TsKind::Tss,
        name: format!("TSS[{}]", elem.name),
        payload: TsPayload::Set { elem },
        structural_hash: key,
        value_schema: schema,
    }))
}

/// TSW[T; n]: tick-count bounded history window.
pub fn tsw_ticks(elem: &'static TypeMeta, len: usize) -> Result<&'static TsMeta, GraphError> {
    tsw(elem, WindowSpec::Ticks(len))
}

/// TSW[T; d]: duration bounded history window.
pub fn tsw_duration(
    elem: &'static TypeMeta,
    duration: EngineTimeDelta,
) -> Result<&'static TsMeta, GraphError> {
    tsw(elem, WindowSpec::Duration(duration))
}

fn tsw(elem: &'static TypeMeta, spec: WindowSpec) -> Result<&'static TsMeta, GraphError> {
    let schema = match spec {
        WindowSpec::Ticks(n) => registry().window_ticks(elem, n)?,
        WindowSpec::Duration(d) => registry().window_duration(elem, d)?,
    };
    let spec_hash = match spec {
        WindowSpec::Ticks(n) => hash_combine(1, n as u64),
        WindowSpec::Duration(d) => hash_combine(2, d.micros() as u64),
    };
    let key = hash_combine(
        hash_combine(TsKind::Tsw as u64 + 0x600, elem.structural_hash),
        spec_hash,
    );
    Ok(intern(key, || TsMeta {
        kind: TsKind::Tsw,
        name: format!("TSW[{}]", schema.name),
        payload: TsPayload::Window { elem, spec },
        structural_hash: key,
        value_schema: schema,
    }))
}

/// REF[T]: reference to an output of the target series shape.
pub fn ts_ref(target: &'static TsMeta) -> &'static TsMeta {
    let key = hash_combine(TsKind::Ref as u64 + 0x700, target.structural_hash);
    intern(key, || TsMeta {
        kind: TsKind::Ref,
        name: format!("REF[{}]", target.name),
        value_schema: registry().reference(target.value_schema),
        payload: TsPayload::Ref { target },
        structural_hash: key,
    })
}

/// SIGNAL: tick-only series. Any output shape may bind to a signal input.
pub fn signal() -> &'static TsMeta {
    let key = TsKind::Signal as u64 + 0x800;
    intern(key, || TsMeta {
        kind: TsKind::Signal,
        name: "SIGNAL".to_string(),
        payload: TsPayload::Signal,
        structural_hash: key,
        value_schema: registry().scalar(ScalarKind::Bool),
    })
}

fn str_hash(s: &str) -> u64 {
    use rustc_hash::FxHasher;
    use std::hash::{Hash, Hasher};
    let mut h = FxHasher::default();
    s.hash(&mut h);
    h.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{float_type, int_type};

    #[test]
    fn ts_meta_interning_is_structural() {
        let a = ts(int_type());
        let b = ts(int_type());
        assert!(same_ts_meta(a, b));
        assert!(!same_ts_meta(a, ts(float_type())));
    }

    #[test]
    fn bundle_schema_mirrors_fields() {
        let quote = tsb(vec![
            ("bid".to_string(), ts(float_type())),
            ("ask".to_string(), ts(float_type())),
        ]);
        assert_eq!(quote.kind, TsKind::Tsb);
        assert_eq!(quote.field_index("ask"), Some(1));
        let fields = quote.value_schema.fields().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "bid");
    }

    #[test]
    fn dict_and_set_require_keyable_scalars() {
        assert!(tsd(int_type(), ts(float_type())).is_ok());
        let lst = registry().list(int_type());
        assert!(tss(lst).is_err());
    }

    #[test]
    fn delta_bearing_kinds() {
        assert!(tss(int_type()).unwrap().has_delta());
        assert!(!ts(int_type()).has_delta());
        assert!(!signal().has_delta());
    }
}
