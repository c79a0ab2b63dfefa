//! Modification-state overlays: the shadow structure parallel to a value.
//!
//! Every position carries its last-modified engine time and a subscriber
//! list; composites additionally carry child overlays and the collection's
//! delta tracker. Parent timestamps are the max of their children, which the
//! write path maintains by stamping every level it descends through.
//!
//! Overlays never own values; the pairing of value and overlay is done by
//! the views.

use smallvec::SmallVec;
use std::fmt;

use tickgraph_common::{EngineTime, GraphError, GraphErrorKind, MIN_DT};

use crate::delta::{DeltaTracker, ElementDelta};
use crate::path::{PathDisplay, PathSeg};
use crate::ts_meta::{TsMeta, TsPayload};

/// Identifies one link subscribed to an overlay position: the owning node
/// and the link's index within that node's flat link table. Resolution back
/// to the link is the runtime's job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId {
    pub node: u32,
    pub link: u32,
}

/// Per-cycle notification buffer. Writes fan into this; the engine drains
/// it after each node evaluation and routes entries through link dedup.
#[derive(Debug, Default)]
pub struct NotifyQueue {
    items: Vec<(SubscriberId, EngineTime)>,
}

impl NotifyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, sub: SubscriberId, time: EngineTime) {
        self.items.push((sub, time));
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (SubscriberId, EngineTime)> + '_ {
        self.items.drain(..)
    }
}

/// Subscribers attached at one position. Two inline entries cover the
/// typical fan-out of an output field.
#[derive(Debug, Default, Clone)]
pub struct ObserverList {
    subs: SmallVec<[SubscriberId; 2]>,
}

impl ObserverList {
    pub fn add(&mut self, sub: SubscriberId) {
        if !self.subs.contains(&sub) {
            self.subs.push(sub);
        }
    }

    pub fn remove(&mut self, sub: SubscriberId) {
        self.subs.retain(|s| *s != sub);
    }

    pub fn iter(&self) -> impl Iterator<Item = SubscriberId> + '_ {
        self.subs.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.subs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }
}

#[derive(Debug)]
pub enum OverlayChildren {
    Leaf,
    /// Bundle/list children, fixed arity.
    Fixed(Vec<Overlay>),
    /// Dict children, slot-indexed and grown on demand.
    Slots(Vec<Overlay>),
}

#[derive(Debug)]
pub enum DeltaSlot {
    None,
    /// Set/map add-remove-update tracking.
    Tracker(DeltaTracker),
    /// Bundle/list modified-child tracking.
    Elements(ElementDelta),
}

pub struct Overlay {
    last_modified: EngineTime,
    observers: ObserverList,
    children: OverlayChildren,
    delta: DeltaSlot,
    /// Child shape for growing slot children on demand.
    slot_child: Option<&'static TsMeta>,
}

impl fmt::Debug for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overlay")
            .field("last_modified", &self.last_modified)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Overlay {
    /// Build the overlay tree mirroring a time-series shape.
    pub fn new(meta: &'static TsMeta) -> Self {
        let (children, delta, slot_child) = match &meta.payload {
            TsPayload::Scalar { .. } | TsPayload::Signal | TsPayload::Ref { .. } | TsPayload::Window { .. } => {
                (OverlayChildren::Leaf, DeltaSlot::None, None)
            }
            TsPayload::Set { .. } => (OverlayChildren::Leaf, DeltaSlot::Tracker(DeltaTracker::new()), None),
            TsPayload::Bundle { fields } => (
                OverlayChildren::Fixed(fields.iter().map(|f| Overlay::new(f.meta)).collect()),
                DeltaSlot::Elements(ElementDelta::new()),
                None,
            ),
            TsPayload::List { elem, len } => (
                OverlayChildren::Fixed((0..*len).map(|_| Overlay::new(elem)).collect()),
                DeltaSlot::Elements(ElementDelta::new()),
                None,
            ),
            TsPayload::Dict { value, .. } => (
                OverlayChildren::Slots(Vec::new()),
                DeltaSlot::Tracker(DeltaTracker::new()),
                Some(*value),
            ),
        };
        Self {
            last_modified: MIN_DT,
            observers: ObserverList::default(),
            children,
            delta,
            slot_child,
        }
    }

    /* ─────────────── modification state ─────────────── */

    #[inline]
    pub fn last_modified_time(&self) -> EngineTime {
        self.last_modified
    }

    #[inline]
    pub fn modified_at(&self, time: EngineTime) -> bool {
        self.last_modified == time
    }

    #[inline]
    pub fn valid(&self) -> bool {
        self.last_modified != MIN_DT
    }

    /// All-valid: this position and every live child position is valid.
    pub fn all_valid(&self) -> bool {
        if !self.valid() {
            return false;
        }
        match &self.children {
            OverlayChildren::Leaf => true,
            OverlayChildren::Fixed(cs) => cs.iter().all(|c| c.all_valid()),
            // Slot children only exist for live elements.
            OverlayChildren::Slots(cs) => cs.iter().filter(|c| c.valid()).count() == cs.len(),
        }
    }

    /// Reset to never-written. Not legal on a composite holding valid
    /// children; the aggregate timestamp would break the max invariant.
    pub fn invalidate(&mut self) -> Result<(), GraphError> {
        let has_valid_children = match &self.children {
            OverlayChildren::Leaf => false,
            OverlayChildren::Fixed(cs) | OverlayChildren::Slots(cs) => {
                cs.iter().any(|c| c.valid())
            }
        };
        if has_valid_children {
            return Err(GraphError::new(GraphErrorKind::InvariantViolation)
                .with_message("invalidate on aggregate with live children"));
        }
        self.last_modified = MIN_DT;
        Ok(())
    }

    /* ─────────────── navigation ─────────────── */

    pub fn child(&self, seg: PathSeg) -> Option<&Overlay> {
        match (&self.children, seg) {
            (OverlayChildren::Fixed(cs), PathSeg::Field(i)) => cs.get(i as usize),
            (OverlayChildren::Fixed(cs), PathSeg::Item(i)) => cs.get(i as usize),
            (OverlayChildren::Slots(cs), PathSeg::Slot(s)) => cs.get(s as usize),
            _ => None,
        }
    }

    pub fn child_mut(&mut self, seg: PathSeg) -> Option<&mut Overlay> {
        match (&mut self.children, seg) {
            (OverlayChildren::Fixed(cs), PathSeg::Field(i)) => cs.get_mut(i as usize),
            (OverlayChildren::Fixed(cs), PathSeg::Item(i)) => cs.get_mut(i as usize),
            (OverlayChildren::Slots(cs), PathSeg::Slot(s)) => cs.get_mut(s as usize),
            _ => None,
        }
    }

    pub fn resolve(&self, path: &[PathSeg]) -> Option<&Overlay> {
        let mut cur = self;
        for seg in path {
            cur = cur.child(*seg)?;
        }
        Some(cur)
    }

    pub fn resolve_mut(&mut self, path: &[PathSeg]) -> Option<&mut Overlay> {
        let mut cur = self;
        for seg in path {
            cur = cur.child_mut(*seg)?;
        }
        Some(cur)
    }

    /// Grow slot children so `slot` exists (dict positions only).
    pub fn ensure_slot(&mut self, slot: u32) -> Result<(), GraphError> {
        let child_meta = self.slot_child.ok_or_else(|| {
            GraphError::new(GraphErrorKind::InvariantViolation)
                .with_message("slot growth on non-dict overlay")
        })?;
        if let OverlayChildren::Slots(cs) = &mut self.children {
            while cs.len() <= slot as usize {
                cs.push(Overlay::new(child_meta));
            }
            Ok(())
        } else {
            Err(GraphError::new(GraphErrorKind::InvariantViolation))
        }
    }

    /// Reset a slot's subtree when its element is erased and recycled.
    pub fn reset_slot(&mut self, slot: u32) {
        if let (OverlayChildren::Slots(cs), Some(meta)) = (&mut self.children, self.slot_child) {
            if let Some(c) = cs.get_mut(slot as usize) {
                *c = Overlay::new(meta);
            }
        }
    }

    /* ─────────────── subscription ─────────────── */

    pub fn subscribe(&mut self, path: &[PathSeg], sub: SubscriberId) -> Result<(), GraphError> {
        match self.resolve_mut(path) {
            Some(o) => {
                o.observers.add(sub);
                Ok(())
            }
            None => Err(GraphError::new(GraphErrorKind::NotFound)
                .with_path(PathDisplay(path).to_string())),
        }
    }

    pub fn unsubscribe(&mut self, path: &[PathSeg], sub: SubscriberId) {
        if let Some(o) = self.resolve_mut(path) {
            o.observers.remove(sub);
        }
    }

    pub fn observers(&self) -> &ObserverList {
        &self.observers
    }

    /* ─────────────── write path ─────────────── */

    /// Stamp the position at `path` (and every ancestor) as modified at
    /// `time`, fanning subscriber notifications at each level into `queue`.
    ///
    /// Modification times are monotonic; stamping backwards is an
    /// invariant violation.
    pub fn mark_modified(
        &mut self,
        path: &[PathSeg],
        time: EngineTime,
        queue: &mut NotifyQueue,
    ) -> Result<(), GraphError> {
        if time < self.last_modified {
            return Err(GraphError::new(GraphErrorKind::InvariantViolation).with_message(
                format!(
                    "modification time moved backwards: {} -> {time}",
                    self.last_modified
                ),
            ));
        }
        self.last_modified = time;
        for sub in self.observers.iter() {
            queue.push(sub, time);
        }

        if let Some((seg, rest)) = path.split_first() {
            // Record the modified child on the composite's element delta.
            if let DeltaSlot::Elements(d) = &mut self.delta {
                let idx = match seg {
                    PathSeg::Field(i) => *i as u32,
                    PathSeg::Item(i) => *i,
                    PathSeg::Slot(s) => *s,
                };
                d.on_child_modified(idx, time);
            }
            let child = self.child_mut(*seg).ok_or_else(|| {
                GraphError::new(GraphErrorKind::NotFound).with_path(PathDisplay(path).to_string())
            })?;
            child.mark_modified(rest, time, queue)?;
        }
        Ok(())
    }

    /* ─────────────── deltas ─────────────── */

    pub fn tracker(&self) -> Option<&DeltaTracker> {
        match &self.delta {
            DeltaSlot::Tracker(t) => Some(t),
            _ => None,
        }
    }

    pub fn tracker_mut(&mut self) -> Option<&mut DeltaTracker> {
        match &mut self.delta {
            DeltaSlot::Tracker(t) => Some(t),
            _ => None,
        }
    }

    pub fn element_delta(&self) -> Option<&ElementDelta> {
        match &self.delta {
            DeltaSlot::Elements(d) => Some(d),
            _ => None,
        }
    }
}
