//! Set algebra as free functions over set values.

use tickgraph_common::{GraphError, GraphErrorKind};

use crate::value::{SetStorage, Value};

fn expect_set<'v>(v: &'v Value, op: &str) -> Result<&'v SetStorage, GraphError> {
    v.as_set().ok_or_else(|| {
        GraphError::new(GraphErrorKind::TypeMismatch).with_message(format!("{op}: requires set value"))
    })
}

/// Union: all elements from both sets.
pub fn set_union(a: &Value, b: &Value) -> Result<Value, GraphError> {
    let (sa, sb) = (expect_set(a, "set_union")?, expect_set(b, "set_union")?);
    let mut out = SetStorage::new();
    for (_, k) in sa.iter().chain(sb.iter()) {
        out.insert(k.clone());
    }
    Ok(Value::Set(out))
}

/// Intersection: elements present in both sets.
pub fn set_intersection(a: &Value, b: &Value) -> Result<Value, GraphError> {
    let (sa, sb) = (
        expect_set(a, "set_intersection")?,
        expect_set(b, "set_intersection")?,
    );
    let mut out = SetStorage::new();
    for (_, k) in sa.iter() {
        if sb.contains(k) {
            out.insert(k.clone());
        }
    }
    Ok(Value::Set(out))
}

/// Difference: elements in `a` but not in `b`.
pub fn set_difference(a: &Value, b: &Value) -> Result<Value, GraphError> {
    let (sa, sb) = (
        expect_set(a, "set_difference")?,
        expect_set(b, "set_difference")?,
    );
    let mut out = SetStorage::new();
    for (_, k) in sa.iter() {
        if !sb.contains(k) {
            out.insert(k.clone());
        }
    }
    Ok(Value::Set(out))
}

/// Symmetric difference: elements in exactly one of the sets.
pub fn set_symmetric_difference(a: &Value, b: &Value) -> Result<Value, GraphError> {
    let (sa, sb) = (
        expect_set(a, "set_symmetric_difference")?,
        expect_set(b, "set_symmetric_difference")?,
    );
    let mut out = SetStorage::new();
    for (_, k) in sa.iter() {
        if !sb.contains(k) {
            out.insert(k.clone());
        }
    }
    for (_, k) in sb.iter() {
        if !sa.contains(k) {
            out.insert(k.clone());
        }
    }
    Ok(Value::Set(out))
}

/// True if every element of `a` is in `b`.
pub fn is_subset(a: &Value, b: &Value) -> Result<bool, GraphError> {
    let (sa, sb) = (expect_set(a, "is_subset")?, expect_set(b, "is_subset")?);
    Ok(sa.iter().all(|(_, k)| sb.contains(k)))
}

/// True if `a` is a subset of `b` and strictly smaller.
pub fn is_proper_subset(a: &Value, b: &Value) -> Result<bool, GraphError> {
    let (sa, sb) = (
        expect_set(a, "is_proper_subset")?,
        expect_set(b, "is_proper_subset")?,
    );
    Ok(sa.len() < sb.len() && sa.iter().all(|(_, k)| sb.contains(k)))
}

/// True if every element of `b` is in `a`.
pub fn is_superset(a: &Value, b: &Value) -> Result<bool, GraphError> {
    is_subset(b, a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickgraph_common::ScalarValue;

    fn set_of(vals: &[i64]) -> Value {
        let mut s = SetStorage::new();
        for v in vals {
            s.insert(ScalarValue::Int(*v));
        }
        Value::Set(s)
    }

    #[test]
    fn algebra_basics() {
        let a = set_of(&[1, 2, 3]);
        let b = set_of(&[2, 3, 4]);

        let union = set_union(&a, &b).unwrap();
        assert_eq!(union.as_set().unwrap().len(), 4);

        let inter = set_intersection(&a, &b).unwrap();
        assert_eq!(inter.as_set().unwrap().len(), 2);

        let diff = set_difference(&a, &b).unwrap();
        assert!(diff.as_set().unwrap().contains(&ScalarValue::Int(1)));
        assert_eq!(diff.as_set().unwrap().len(), 1);

        let sym = set_symmetric_difference(&a, &b).unwrap();
        assert_eq!(sym.as_set().unwrap().len(), 2);
    }

    #[test]
    fn subset_predicates() {
        let a = set_of(&[1, 2]);
        let b = set_of(&[1, 2, 3]);
        assert!(is_subset(&a, &b).unwrap());
        assert!(is_proper_subset(&a, &b).unwrap());
        assert!(!is_proper_subset(&b, &b).unwrap());
        assert!(is_superset(&b, &a).unwrap());
    }

    #[test]
    fn non_set_operand_is_rejected() {
        let err = set_union(&Value::from(1i64), &set_of(&[1])).unwrap_err();
        assert_eq!(err.kind, tickgraph_common::GraphErrorKind::TypeMismatch);
    }
}
