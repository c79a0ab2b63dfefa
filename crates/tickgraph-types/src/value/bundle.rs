//! Bundle storage: declared fields at compile-known positions.
//!
//! List storage is a plain `Vec<Value>` owned directly by the `Value::List`
//! variant; bundles get a named wrapper so field navigation stays by index
//! after a one-time name resolution against the descriptor.

use super::Value;

/// Struct-like composite: one value per declared field, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct BundleStorage {
    fields: Vec<Value>,
}

impl BundleStorage {
    pub fn new(fields: Vec<Value>) -> Self {
        Self { fields }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[inline]
    pub fn field(&self, index: usize) -> Option<&Value> {
        self.fields.get(index)
    }

    #[inline]
    pub fn field_mut(&mut self, index: usize) -> Option<&mut Value> {
        self.fields.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter()
    }
}
