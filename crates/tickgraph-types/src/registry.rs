//! Structural interning of type descriptors.
//!
//! `register` returns the canonical `&'static TypeMeta` for a shape: two
//! requests for identically-shaped types resolve to the same pointer. Keys
//! are composed hashes over the shape (boost-style combine), matching the
//! way composite descriptors are cached in the schema layer.
//!
//! Reads are lock-free after the pointer escapes; the intern map itself is
//! guarded by a mutex. Wiring is the single writer in practice, evaluation
//! never registers types.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use std::sync::Mutex;

use tickgraph_common::{EngineTimeDelta, GraphError, GraphErrorKind, ScalarKind};

use crate::type_meta::{
    FieldMeta, TypeFlags, TypeKind, TypeMeta, TypePayload, WindowSpec,
};
use crate::value::ops::{COMPOSITE_OPS, SCALAR_OPS};

pub fn hash_combine(h1: u64, h2: u64) -> u64 {
    h1 ^ (h2
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(h1 << 6)
        .wrapping_add(h1 >> 2))
}

fn hash_str(s: &str) -> u64 {
    use rustc_hash::FxHasher;
    use std::hash::{Hash, Hasher};
    let mut h = FxHasher::default();
    s.hash(&mut h);
    h.finish()
}

pub struct TypeRegistry {
    by_key: Mutex<FxHashMap<u64, &'static TypeMeta>>,
}

static REGISTRY: Lazy<TypeRegistry> = Lazy::new(|| TypeRegistry {
    by_key: Mutex::new(FxHashMap::default()),
});

/// The process-wide registry. Descriptor lifetime is the registry's
/// lifetime, which is the process.
pub fn registry() -> &'static TypeRegistry {
    &REGISTRY
}

impl TypeRegistry {
    /// Intern a shape: the first registration wins, later identical shapes
    /// get the same pointer back.
    fn intern(
        &self,
        key: u64,
        make: impl FnOnce() -> TypeMeta,
    ) -> &'static TypeMeta {
        let mut map = self.by_key.lock().expect("type registry poisoned");
        if let Some(existing) = map.get(&key) {
            return existing;
        }
        let leaked: &'static TypeMeta = Box::leak(Box::new(make()));
        map.insert(key, leaked);
        leaked
    }

    pub fn scalar(&self, kind: ScalarKind) -> &'static TypeMeta {
        let key = hash_combine(TypeKind::Scalar as u64, kind as u64 + 1);
        self.intern(key, || {
            let mut flags = TypeFlags::HASHABLE
                | TypeFlags::COMPARABLE
                | TypeFlags::EQUATABLE
                | TypeFlags::TRIVIALLY_CONSTRUCTIBLE;
            if kind != ScalarKind::Str {
                flags |= TypeFlags::TRIVIALLY_DESTRUCTIBLE
                    | TypeFlags::TRIVIALLY_COPYABLE
                    | TypeFlags::BUFFER_COMPATIBLE;
            }
            TypeMeta {
                kind: TypeKind::Scalar,
                flags,
                payload: TypePayload::Scalar(kind),
                name: kind.to_string(),
                structural_hash: key,
                ops: &SCALAR_OPS,
            }
        })
    }

    pub fn tuple(&self, items: Vec<&'static TypeMeta>) -> &'static TypeMeta {
        let key = items.iter().fold(TypeKind::Tuple as u64 + 0x10, |h, m| {
            hash_combine(h, m.structural_hash)
        });
        self.intern(key, || {
            let mut flags = TypeFlags::HASHABLE | TypeFlags::COMPARABLE | TypeFlags::EQUATABLE;
            for m in &items {
                flags &= m.flags | !(TypeFlags::HASHABLE | TypeFlags::COMPARABLE | TypeFlags::EQUATABLE);
            }
            let name = format!(
                "tuple[{}]",
                items.iter().map(|m| m.name.as_str()).collect::<Vec<_>>().join(",")
            );
            TypeMeta {
                kind: TypeKind::Tuple,
                flags,
                payload: TypePayload::Tuple { items },
                name,
                structural_hash: key,
                ops: &COMPOSITE_OPS,
            }
        })
    }

    pub fn bundle(&self, fields: Vec<(String, &'static TypeMeta)>) -> &'static TypeMeta {
        let key = fields.iter().fold(TypeKind::Bundle as u64 + 0x20, |h, (n, m)| {
            hash_combine(hash_combine(h, hash_str(n)), m.structural_hash)
        });
        self.intern(key, || {
            let mut flags = TypeFlags::EQUATABLE;
            for (_, m) in &fields {
                if !m.is_equatable() {
                    flags = TypeFlags::empty();
                }
            }
            let name = format!(
                "bundle{{{}}}",
                fields
                    .iter()
                    .map(|(n, m)| format!("{n}:{}", m.name))
                    .collect::<Vec<_>>()
                    .join(",")
            );
            let fields = fields
                .into_iter()
                .map(|(name, ty)| FieldMeta { name, ty })
                .collect();
            TypeMeta {
                kind: TypeKind::Bundle,
                flags,
                payload: TypePayload::Bundle { fields },
                name,
                structural_hash: key,
                ops: &COMPOSITE_OPS,
            }
        })
    }

    pub fn list(&self, elem: &'static TypeMeta) -> &'static TypeMeta {
        self.list_impl(elem, None)
    }

    pub fn fixed_list(&self, elem: &'static TypeMeta, len: usize) -> &'static TypeMeta {
        self.list_impl(elem, Some(len))
    }

    fn list_impl(&self, elem: &'static TypeMeta, fixed_len: Option<usize>) -> &'static TypeMeta {
        let key = hash_combine(
            hash_combine(TypeKind::List as u64 + 0x30, elem.structural_hash),
            fixed_len.map(|n| n as u64 + 1).unwrap_or(0),
        );
        self.intern(key, || {
            let flags = if elem.is_equatable() {
                TypeFlags::EQUATABLE
            } else {
                TypeFlags::empty()
            };
            let name = match fixed_len {
                Some(n) => format!("list[{};{n}]", elem.name),
                None => format!("list[{}]", elem.name),
            };
            TypeMeta {
                kind: TypeKind::List,
                flags,
                payload: TypePayload::List { elem, fixed_len },
                name,
                structural_hash: key,
                ops: &COMPOSITE_OPS,
            }
        })
    }

    /// Sets key on hashable scalars; anything else is a wiring error.
    pub fn set(&self, elem: &'static TypeMeta) -> Result<&'static TypeMeta, GraphError> {
        require_keyable(elem, "set element")?;
        let key = hash_combine(TypeKind::Set as u64 + 0x40, elem.structural_hash);
        Ok(self.intern(key, || TypeMeta {
            kind: TypeKind::Set,
            flags: TypeFlags::EQUATABLE,
            payload: TypePayload::Set { elem },
            name: format!("set[{}]", elem.name),
            structural_hash: key,
            ops: &COMPOSITE_OPS,
        }))
    }

    pub fn map(
        &self,
        key_ty: &'static TypeMeta,
        value: &'static TypeMeta,
    ) -> Result<&'static TypeMeta, GraphError> {
        require_keyable(key_ty, "map key")?;
        let key = hash_combine(
            hash_combine(TypeKind::Map as u64 + 0x50, key_ty.structural_hash),
            value.structural_hash,
        );
        Ok(self.intern(key, || {
            let flags = if value.is_equatable() {
                TypeFlags::EQUATABLE
            } else {
                TypeFlags::empty()
            };
            TypeMeta {
                kind: TypeKind::Map,
                flags,
                payload: TypePayload::Map { key: key_ty, value },
                name: format!("map[{},{}]", key_ty.name, value.name),
                structural_hash: key,
                ops: &COMPOSITE_OPS,
            }
        }))
    }

    pub fn window_ticks(
        &self,
        elem: &'static TypeMeta,
        len: usize,
    ) -> Result<&'static TypeMeta, GraphError> {
        self.window(elem, WindowSpec::Ticks(len))
    }

    pub fn window_duration(
        &self,
        elem: &'static TypeMeta,
        duration: EngineTimeDelta,
    ) -> Result<&'static TypeMeta, GraphError> {
        self.window(elem, WindowSpec::Duration(duration))
    }

    fn window(
        &self,
        elem: &'static TypeMeta,
        spec: WindowSpec,
    ) -> Result<&'static TypeMeta, GraphError> {
        if elem.kind != TypeKind::Scalar {
            return Err(GraphError::new(GraphErrorKind::TypeMismatch)
                .with_message("window element must be a scalar type"));
        }
        let spec_hash = match spec {
            WindowSpec::Ticks(n) => hash_combine(1, n as u64),
            WindowSpec::Duration(d) => hash_combine(2, d.micros() as u64),
        };
        let key = hash_combine(
            hash_combine(TypeKind::Window as u64 + 0x60, elem.structural_hash),
            spec_hash,
        );
        let name = match spec {
            WindowSpec::Ticks(n) => format!("window[{};{n}]", elem.name),
            WindowSpec::Duration(d) => format!("window[{};{d}]", elem.name),
        };
        Ok(self.intern(key, || TypeMeta {
            kind: TypeKind::Window,
            flags: TypeFlags::EQUATABLE,
            payload: TypePayload::Window { elem, spec },
            name,
            structural_hash: key,
            ops: &COMPOSITE_OPS,
        }))
    }

    pub fn reference(&self, target: &'static TypeMeta) -> &'static TypeMeta {
        let key = hash_combine(TypeKind::Ref as u64 + 0x70, target.structural_hash);
        self.intern(key, || TypeMeta {
            kind: TypeKind::Ref,
            flags: TypeFlags::EQUATABLE,
            payload: TypePayload::Ref { target },
            name: format!("ref[{}]", target.name),
            structural_hash: key,
            ops: &COMPOSITE_OPS,
        })
    }

    pub fn interned_count(&self) -> usize {
        self.by_key.lock().expect("type registry poisoned").len()
    }
}

fn require_keyable(meta: &TypeMeta, what: &str) -> Result<(), GraphError> {
    if meta.kind != TypeKind::Scalar || !meta.is_hashable() {
        return Err(GraphError::new(GraphErrorKind::TypeMismatch)
            .with_message(format!("{what} must be a hashable scalar, got {}", meta.name)));
    }
    Ok(())
}

/* ───────────────────── builtin scalar shorthands ──────────────────── */

pub fn bool_type() -> &'static TypeMeta {
    registry().scalar(ScalarKind::Bool)
}

pub fn int_type() -> &'static TypeMeta {
    registry().scalar(ScalarKind::Int)
}

pub fn float_type() -> &'static TypeMeta {
    registry().scalar(ScalarKind::Float)
}

pub fn str_type() -> &'static TypeMeta {
    registry().scalar(ScalarKind::Str)
}

pub fn time_type() -> &'static TypeMeta {
    registry().scalar(ScalarKind::Time)
}

pub fn duration_type() -> &'static TypeMeta {
    registry().scalar(ScalarKind::Duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_meta::same_type;

    #[test]
    fn identical_shapes_intern_to_one_pointer() {
        let a = registry().set(int_type()).unwrap();
        let b = registry().set(int_type()).unwrap();
        assert!(same_type(a, b));

        let t1 = registry().tuple(vec![int_type(), float_type()]);
        let t2 = registry().tuple(vec![int_type(), float_type()]);
        assert!(same_type(t1, t2));

        let t3 = registry().tuple(vec![float_type(), int_type()]);
        assert!(!same_type(t1, t3));
    }

    #[test]
    fn bundle_interning_keys_on_names_and_types() {
        let a = registry().bundle(vec![
            ("bid".to_string(), float_type()),
            ("ask".to_string(), float_type()),
        ]);
        let b = registry().bundle(vec![
            ("bid".to_string(), float_type()),
            ("ask".to_string(), float_type()),
        ]);
        let c = registry().bundle(vec![
            ("bid".to_string(), float_type()),
            ("mid".to_string(), float_type()),
        ]);
        assert!(same_type(a, b));
        assert!(!same_type(a, c));
        assert_eq!(a.field_index("ask"), Some(1));
    }

    #[test]
    fn unhashable_keys_are_rejected() {
        let lst = registry().list(int_type());
        assert!(registry().set(lst).is_err());
        assert!(registry().map(lst, int_type()).is_err());
    }

    #[test]
    fn flags_describe_capabilities() {
        assert!(int_type().is_trivially_copyable());
        assert!(!str_type().is_trivially_copyable());
        assert!(int_type().is_comparable());
        let s = registry().set(int_type()).unwrap();
        assert!(s.is_equatable());
        assert!(!s.is_hashable());
        // Gated ops surface NotCapable rather than panicking.
        let v = s.construct();
        assert!(s.hash_value(&v).is_err());
    }
}
