//! Open-addressed set storage with stable slot indices.
//!
//! Every element occupies one slot for its whole lifetime. Deltas, observers
//! and parallel value arrays key off the slot index, which is what makes
//! cross-structure lookup O(1) and delta propagation copy-free.
//!
//! Erase is deferred: the slot is unlinked from the index table immediately
//! but its key stays resident until [`SetStorage::drain_deferred`] runs at
//! the cycle boundary, so observers draining a delta can still resolve the
//! removed slot to its last key.
//!
//! Rehash rebuilds only the probe table; slots never move, so outstanding
//! slot-keyed deltas survive growth untouched.

use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

use tickgraph_common::{GraphError, GraphErrorKind, ScalarValue};

/// Stable index of one element within a set or map.
pub type SlotId = u32;

const INITIAL_CAPACITY: usize = 8;
const MAX_LOAD_NUM: usize = 3;
const MAX_LOAD_DEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Empty,
    Tombstone,
    Occupied(SlotId),
}

#[derive(Debug, Clone)]
struct Slot {
    key: Option<ScalarValue>,
    /// False once erased; the key lingers until the deferred drain.
    live: bool,
}

/// Result of an insert: the slot plus whether the key was newly added.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InsertOutcome {
    pub slot: SlotId,
    pub inserted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SetStorage {
    slots: Vec<Slot>,
    buckets: Vec<Bucket>,
    len: usize,
    /// Slots available for reuse.
    free: Vec<SlotId>,
    /// Slots erased this cycle; drained at the cycle boundary.
    deferred_free: Vec<SlotId>,
}

pub fn hash_key(key: &ScalarValue) -> u64 {
    let mut h = FxHasher::default();
    key.hash(&mut h);
    h.finish()
}

impl SetStorage {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total slots ever allocated (live, deferred and free).
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn contains(&self, key: &ScalarValue) -> bool {
        self.lookup(key).is_some()
    }

    /// Find the slot holding `key`, if live.
    pub fn lookup(&self, key: &ScalarValue) -> Option<SlotId> {
        if self.buckets.is_empty() {
            return None;
        }
        let mask = self.buckets.len() - 1;
        let mut idx = (hash_key(key) as usize) & mask;
        loop {
            match self.buckets[idx] {
                Bucket::Empty => return None,
                Bucket::Tombstone => {}
                Bucket::Occupied(slot) => {
                    let s = &self.slots[slot as usize];
                    if s.live && s.key.as_ref() == Some(key) {
                        return Some(slot);
                    }
                }
            }
            idx = (idx + 1) & mask;
        }
    }

    /// Insert a key, returning its slot. Existing keys keep their slot.
    pub fn insert(&mut self, key: ScalarValue) -> InsertOutcome {
        if let Some(slot) = self.lookup(&key) {
            return InsertOutcome { slot, inserted: false };
        }
        self.reserve_for_one();

        let slot = match self.free.pop() {
            Some(s) => {
                self.slots[s as usize] = Slot { key: Some(key.clone()), live: true };
                s
            }
            None => {
                let s = self.slots.len() as SlotId;
                self.slots.push(Slot { key: Some(key.clone()), live: true });
                s
            }
        };

        let mask = self.buckets.len() - 1;
        let mut idx = (hash_key(&key) as usize) & mask;
        loop {
            match self.buckets[idx] {
                Bucket::Empty | Bucket::Tombstone => {
                    self.buckets[idx] = Bucket::Occupied(slot);
                    break;
                }
                Bucket::Occupied(_) => idx = (idx + 1) & mask,
            }
        }
        self.len += 1;
        InsertOutcome { slot, inserted: true }
    }

    /// Erase a key. The slot is unlinked but its key stays resident until
    /// `drain_deferred`. Returns the slot that held the key.
    pub fn erase(&mut self, key: &ScalarValue) -> Option<SlotId> {
        if self.buckets.is_empty() {
            return None;
        }
        let mask = self.buckets.len() - 1;
        let mut idx = (hash_key(key) as usize) & mask;
        loop {
            match self.buckets[idx] {
                Bucket::Empty => return None,
                Bucket::Tombstone => {}
                Bucket::Occupied(slot) => {
                    let s = &mut self.slots[slot as usize];
                    if s.live && s.key.as_ref() == Some(key) {
                        s.live = false;
                        self.buckets[idx] = Bucket::Tombstone;
                        self.deferred_free.push(slot);
                        self.len -= 1;
                        return Some(slot);
                    }
                }
            }
            idx = (idx + 1) & mask;
        }
    }

    /// Erase every live key, returning the affected slots.
    pub fn clear(&mut self) -> Vec<SlotId> {
        let mut cleared = Vec::with_capacity(self.len);
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.live {
                slot.live = false;
                cleared.push(i as SlotId);
            }
        }
        self.deferred_free.extend_from_slice(&cleared);
        for b in &mut self.buckets {
            if matches!(b, Bucket::Occupied(_)) {
                *b = Bucket::Tombstone;
            }
        }
        self.len = 0;
        cleared
    }

    /// The key at a slot. Resolves deferred-erased slots too, which is what
    /// lets delta observers read removed elements for the rest of the cycle.
    pub fn key_at(&self, slot: SlotId) -> Option<&ScalarValue> {
        self.slots.get(slot as usize)?.key.as_ref()
    }

    #[inline]
    pub fn is_live(&self, slot: SlotId) -> bool {
        self.slots
            .get(slot as usize)
            .map(|s| s.live)
            .unwrap_or(false)
    }

    /// Iterate live `(slot, key)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &ScalarValue)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            if s.live {
                s.key.as_ref().map(|k| (i as SlotId, k))
            } else {
                None
            }
        })
    }

    /// Release slots erased during the cycle for reuse. Runs at the cycle
    /// boundary, after observers have drained.
    pub fn drain_deferred(&mut self) {
        for slot in self.deferred_free.drain(..) {
            let s = &mut self.slots[slot as usize];
            // Re-inserted keys reclaim their slot before the drain.
            if !s.live {
                s.key = None;
                self.free.push(slot);
            }
        }
    }

    pub fn has_deferred(&self) -> bool {
        !self.deferred_free.is_empty()
    }

    /// The slot a key was erased from this cycle, if still deferred.
    pub fn deferred_slot_for(&self, key: &ScalarValue) -> Option<SlotId> {
        self.deferred_free.iter().copied().find(|&slot| {
            let s = &self.slots[slot as usize];
            !s.live && s.key.as_ref() == Some(key)
        })
    }

    /// Re-occupy a specific slot with a key. Used for the remove-then-insert
    /// cancellation so the pair keeps a single stable slot within the cycle.
    pub(crate) fn reinsert_at(&mut self, slot: SlotId, key: ScalarValue) -> Result<(), GraphError> {
        let s = self
            .slots
            .get_mut(slot as usize)
            .ok_or_else(|| GraphError::new(GraphErrorKind::InvariantViolation))?;
        if s.live {
            return Err(GraphError::new(GraphErrorKind::InvariantViolation)
                .with_message("reinsert into live slot"));
        }
        s.key = Some(key.clone());
        s.live = true;
        if let Some(pos) = self.deferred_free.iter().position(|&d| d == slot) {
            self.deferred_free.swap_remove(pos);
        }
        let mask = self.buckets.len() - 1;
        let mut idx = (hash_key(&key) as usize) & mask;
        loop {
            match self.buckets[idx] {
                Bucket::Empty | Bucket::Tombstone => {
                    self.buckets[idx] = Bucket::Occupied(slot);
                    break;
                }
                Bucket::Occupied(_) => idx = (idx + 1) & mask,
            }
        }
        self.len += 1;
        Ok(())
    }

    fn reserve_for_one(&mut self) {
        if self.buckets.is_empty() {
            self.buckets = vec![Bucket::Empty; INITIAL_CAPACITY];
            return;
        }
        let used = self
            .buckets
            .iter()
            .filter(|b| !matches!(b, Bucket::Empty))
            .count();
        if (used + 1) * MAX_LOAD_DEN >= self.buckets.len() * MAX_LOAD_NUM {
            self.rehash(self.buckets.len() * 2);
        }
    }

    /// Rebuild the probe table. Slot ids are untouched, so slot-keyed deltas
    /// stay valid across growth.
    fn rehash(&mut self, new_capacity: usize) {
        self.buckets = vec![Bucket::Empty; new_capacity];
        let mask = new_capacity - 1;
        for (i, s) in self.slots.iter().enumerate() {
            if !s.live {
                continue;
            }
            let key = s.key.as_ref().expect("live slot with key");
            let mut idx = (hash_key(key) as usize) & mask;
            loop {
                match self.buckets[idx] {
                    Bucket::Empty => {
                        self.buckets[idx] = Bucket::Occupied(i as SlotId);
                        break;
                    }
                    _ => idx = (idx + 1) & mask,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> ScalarValue {
        ScalarValue::Int(v)
    }

    #[test]
    fn insert_assigns_stable_slots() {
        let mut s = SetStorage::new();
        let a = s.insert(int(1));
        let b = s.insert(int(2));
        assert!(a.inserted && b.inserted);
        assert_ne!(a.slot, b.slot);
        // Duplicate insert keeps the slot.
        let again = s.insert(int(1));
        assert!(!again.inserted);
        assert_eq!(again.slot, a.slot);
    }

    #[test]
    fn erased_slot_resolves_until_drain() {
        let mut s = SetStorage::new();
        let a = s.insert(int(7)).slot;
        assert_eq!(s.erase(&int(7)), Some(a));
        assert!(!s.contains(&int(7)));
        // The key is still resolvable through the slot.
        assert_eq!(s.key_at(a), Some(&int(7)));
        s.drain_deferred();
        assert_eq!(s.key_at(a), None);
    }

    #[test]
    fn slot_reuse_waits_for_drain() {
        let mut s = SetStorage::new();
        let a = s.insert(int(1)).slot;
        s.erase(&int(1));
        // Slot must not be reused before the cycle boundary.
        let b = s.insert(int(2)).slot;
        assert_ne!(a, b);
        s.drain_deferred();
        let c = s.insert(int(3)).slot;
        assert_eq!(c, a);
    }

    #[test]
    fn rehash_preserves_slots() {
        let mut s = SetStorage::new();
        let slots: Vec<SlotId> = (0..100).map(|i| s.insert(int(i)).slot).collect();
        for (i, &slot) in slots.iter().enumerate() {
            assert_eq!(s.lookup(&int(i as i64)), Some(slot));
        }
        assert_eq!(s.len(), 100);
    }

    #[test]
    fn clear_defers_every_slot() {
        let mut s = SetStorage::new();
        for i in 0..4 {
            s.insert(int(i));
        }
        let cleared = s.clear();
        assert_eq!(cleared.len(), 4);
        assert_eq!(s.len(), 0);
        assert!(s.has_deferred());
    }
}
