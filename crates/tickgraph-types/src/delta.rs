//! Per-collection delta trackers.
//!
//! A tracker observes every mutation the storage applies within one cycle
//! and records the net effect per slot, with cancellation:
//!
//! | sequence in one cycle    | resulting delta            |
//! |--------------------------|----------------------------|
//! | insert(s)                | added(s)                   |
//! | erase(s)                 | removed(s)                 |
//! | insert(s) then erase(s)  | neither                    |
//! | erase(s) then insert(s)  | updated(s)                 |
//! | update(s) on existing    | updated(s)                 |
//! | insert(s) then update(s) | added(s) only              |
//! | clear()                  | cleared flag + per-slot erases |
//!
//! Trackers reset lazily: each records the engine time of its current batch
//! and clears itself on the first mutation stamped with a later time. That
//! keeps the delta readable by subscribers for the remainder of the cycle
//! and through to the next one in which the collection ticks.

use rustc_hash::FxHashSet;
use tickgraph_common::{EngineTime, MIN_DT};

use crate::value::SlotId;

/// Tracks added/removed/updated slots for sets and maps. Sets never see
/// `on_update`; maps route value overwrites through it.
#[derive(Debug, Default)]
pub struct DeltaTracker {
    tick: EngineTime,
    added: Vec<SlotId>,
    removed: Vec<SlotId>,
    /// Hashes of removed keys, for O(1) `was_key_removed` without touching
    /// the (possibly recycled) storage.
    removed_hashes: FxHashSet<u64>,
    updated: Vec<SlotId>,
    cleared: bool,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self {
            tick: MIN_DT,
            ..Default::default()
        }
    }

    /// The engine time of the batch currently held.
    #[inline]
    pub fn tick(&self) -> EngineTime {
        self.tick
    }

    fn roll(&mut self, now: EngineTime) {
        if self.tick != now {
            self.added.clear();
            self.removed.clear();
            self.removed_hashes.clear();
            self.updated.clear();
            self.cleared = false;
            self.tick = now;
        }
    }

    pub fn on_insert(&mut self, slot: SlotId, now: EngineTime) {
        self.roll(now);
        if let Some(pos) = self.removed.iter().position(|&s| s == slot) {
            // Removed then re-added within the cycle: net effect is an update.
            self.removed.swap_remove(pos);
            if !self.updated.contains(&slot) {
                self.updated.push(slot);
            }
        } else {
            self.added.push(slot);
        }
    }

    pub fn on_erase(&mut self, slot: SlotId, key_hash: u64, now: EngineTime) {
        self.roll(now);
        if let Some(pos) = self.added.iter().position(|&s| s == slot) {
            // Added then removed within the cycle: no net change.
            self.added.swap_remove(pos);
            if let Some(upd) = self.updated.iter().position(|&s| s == slot) {
                self.updated.swap_remove(upd);
            }
        } else {
            self.removed.push(slot);
            self.removed_hashes.insert(key_hash);
            // Removal supersedes any earlier update.
            if let Some(upd) = self.updated.iter().position(|&s| s == slot) {
                self.updated.swap_remove(upd);
            }
        }
    }

    pub fn on_update(&mut self, slot: SlotId, now: EngineTime) {
        self.roll(now);
        // An add already implies the new value.
        if self.added.contains(&slot) {
            return;
        }
        if !self.updated.contains(&slot) {
            self.updated.push(slot);
        }
    }

    /// Record a clear. Per-slot erases are still fired by the caller for
    /// each element that was live, so subscribers may drain either form.
    pub fn on_clear(&mut self, now: EngineTime) {
        self.roll(now);
        self.cleared = true;
    }

    pub fn added_slots(&self) -> &[SlotId] {
        &self.added
    }

    pub fn removed_slots(&self) -> &[SlotId] {
        &self.removed
    }

    pub fn updated_slots(&self) -> &[SlotId] {
        &self.updated
    }

    pub fn was_added(&self, slot: SlotId) -> bool {
        self.added.contains(&slot)
    }

    pub fn was_removed(&self, slot: SlotId) -> bool {
        self.removed.contains(&slot)
    }

    pub fn was_updated(&self, slot: SlotId) -> bool {
        self.updated.contains(&slot)
    }

    /// O(1) membership test on removed keys by hash.
    pub fn was_key_removed(&self, key_hash: u64) -> bool {
        self.removed_hashes.contains(&key_hash)
    }

    pub fn was_cleared(&self) -> bool {
        self.cleared
    }

    pub fn has_delta(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty() || !self.updated.is_empty() || self.cleared
    }

    pub fn has_key_delta(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    pub fn has_value_updates(&self) -> bool {
        !self.updated.is_empty()
    }
}

/// Modified-child tracking for bundles and lists: which element positions
/// ticked this cycle. Same lazy reset discipline as `DeltaTracker`.
#[derive(Debug, Default)]
pub struct ElementDelta {
    tick: EngineTime,
    modified: Vec<u32>,
}

impl ElementDelta {
    pub fn new() -> Self {
        Self {
            tick: MIN_DT,
            modified: Vec::new(),
        }
    }

    pub fn on_child_modified(&mut self, index: u32, now: EngineTime) {
        if self.tick != now {
            self.modified.clear();
            self.tick = now;
        }
        if !self.modified.contains(&index) {
            self.modified.push(index);
        }
    }

    pub fn modified_children(&self) -> &[u32] {
        &self.modified
    }

    pub fn was_child_modified(&self, index: u32) -> bool {
        self.modified.contains(&index)
    }

    #[inline]
    pub fn tick(&self) -> EngineTime {
        self.tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(us: i64) -> EngineTime {
        EngineTime::from_micros(us)
    }

    #[test]
    fn add_then_remove_cancels() {
        let mut d = DeltaTracker::new();
        d.on_insert(3, t(0));
        d.on_erase(3, 0xabc, t(0));
        assert!(!d.was_added(3));
        assert!(!d.was_removed(3));
        assert!(!d.has_delta());
    }

    #[test]
    fn remove_then_add_is_update() {
        let mut d = DeltaTracker::new();
        d.on_erase(5, 0xdef, t(0));
        d.on_insert(5, t(0));
        assert!(!d.was_added(5));
        assert!(!d.was_removed(5));
        assert!(d.was_updated(5));
    }

    #[test]
    fn add_then_update_is_add_only() {
        let mut d = DeltaTracker::new();
        d.on_insert(1, t(0));
        d.on_update(1, t(0));
        assert!(d.was_added(1));
        assert!(!d.was_updated(1));
    }

    #[test]
    fn states_are_mutually_exclusive() {
        let mut d = DeltaTracker::new();
        d.on_insert(1, t(0));
        d.on_erase(2, 0x2, t(0));
        d.on_update(3, t(0));
        for slot in [1u32, 2, 3] {
            let states = [d.was_added(slot), d.was_removed(slot), d.was_updated(slot)];
            assert_eq!(states.iter().filter(|&&s| s).count(), 1);
        }
    }

    #[test]
    fn later_tick_resets_lazily() {
        let mut d = DeltaTracker::new();
        d.on_insert(1, t(0));
        assert!(d.was_added(1));
        // Still observable after the cycle...
        assert!(d.has_delta());
        // ...until the collection mutates at a later time.
        d.on_insert(2, t(10));
        assert!(!d.was_added(1));
        assert!(d.was_added(2));
    }

    #[test]
    fn removed_key_hash_lookup() {
        let mut d = DeltaTracker::new();
        d.on_erase(9, 0xfeed, t(0));
        assert!(d.was_key_removed(0xfeed));
        assert!(!d.was_key_removed(0xbeef));
    }

    #[test]
    fn clear_sets_flag_and_keeps_erases() {
        let mut d = DeltaTracker::new();
        d.on_clear(t(0));
        d.on_erase(0, 0x0, t(0));
        d.on_erase(1, 0x1, t(0));
        assert!(d.was_cleared());
        assert_eq!(d.removed_slots().len(), 2);
    }
}
