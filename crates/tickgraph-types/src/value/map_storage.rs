//! Map storage: a key set plus a parallel value array sharing its slots.

use tickgraph_common::{GraphError, GraphErrorKind, ScalarValue};

use super::set_storage::{SetStorage, SlotId};
use super::Value;

/// Outcome of a map upsert.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MapWrite {
    Inserted(SlotId),
    Updated(SlotId),
}

impl MapWrite {
    pub fn slot(self) -> SlotId {
        match self {
            MapWrite::Inserted(s) | MapWrite::Updated(s) => s,
        }
    }
}

/// Parallel key/value storage. The key set owns the slot discipline; values
/// live at the same slot index as their key.
#[derive(Debug, Clone, Default)]
pub struct MapStorage {
    keys: SetStorage,
    values: Vec<Option<Value>>,
}

impl MapStorage {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[inline]
    pub fn keys(&self) -> &SetStorage {
        &self.keys
    }

    pub fn contains(&self, key: &ScalarValue) -> bool {
        self.keys.contains(key)
    }

    pub fn lookup(&self, key: &ScalarValue) -> Option<SlotId> {
        self.keys.lookup(key)
    }

    pub fn key_at(&self, slot: SlotId) -> Option<&ScalarValue> {
        self.keys.key_at(slot)
    }

    /// The value at a slot. Like keys, deferred-erased values stay readable
    /// until the cycle-boundary drain.
    pub fn value_at(&self, slot: SlotId) -> Option<&Value> {
        self.values.get(slot as usize)?.as_ref()
    }

    pub fn value_at_mut(&mut self, slot: SlotId) -> Option<&mut Value> {
        self.values.get_mut(slot as usize)?.as_mut()
    }

    pub fn get(&self, key: &ScalarValue) -> Option<&Value> {
        self.value_at(self.keys.lookup(key)?)
    }

    /// Insert or update. The caller routes the outcome into the delta
    /// tracker (`Inserted` -> on_insert, `Updated` -> on_update).
    pub fn upsert(&mut self, key: ScalarValue, value: Value) -> MapWrite {
        if let Some(slot) = self.keys.lookup(&key) {
            self.values[slot as usize] = Some(value);
            return MapWrite::Updated(slot);
        }
        let outcome = self.keys.insert(key);
        let idx = outcome.slot as usize;
        if idx >= self.values.len() {
            self.values.resize_with(idx + 1, || None);
        }
        self.values[idx] = Some(value);
        MapWrite::Inserted(outcome.slot)
    }

    /// Erase a key; value stays resident for delta readers until drain.
    pub fn erase(&mut self, key: &ScalarValue) -> Option<SlotId> {
        self.keys.erase(key)
    }

    pub fn clear(&mut self) -> Vec<SlotId> {
        self.keys.clear()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &ScalarValue, &Value)> {
        self.keys.iter().filter_map(move |(slot, key)| {
            self.value_at(slot).map(|v| (slot, key, v))
        })
    }

    pub fn drain_deferred(&mut self) {
        // Free the values of slots about to be recycled, then the keys.
        for slot in 0..self.values.len() {
            if !self.keys.is_live(slot as SlotId) && self.keys.key_at(slot as SlotId).is_some() {
                self.values[slot] = None;
            }
        }
        self.keys.drain_deferred();
    }

    pub fn has_deferred(&self) -> bool {
        self.keys.has_deferred()
    }

    /// The slot a key was erased from this cycle, if still deferred.
    pub fn deferred_slot_for(&self, key: &ScalarValue) -> Option<SlotId> {
        self.keys.deferred_slot_for(key)
    }

    /// Re-occupy an erased slot (remove-then-insert cancellation).
    pub(crate) fn reinsert_at(
        &mut self,
        slot: SlotId,
        key: ScalarValue,
        value: Value,
    ) -> Result<(), GraphError> {
        self.keys.reinsert_at(slot, key)?;
        let idx = slot as usize;
        if idx >= self.values.len() {
            return Err(GraphError::new(GraphErrorKind::InvariantViolation));
        }
        self.values[idx] = Some(value);
        Ok(())
    }
}
