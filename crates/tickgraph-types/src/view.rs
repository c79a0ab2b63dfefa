//! Views: the sole navigation and mutation surface over time-series state.
//!
//! A `TsValue` owns one output's value and its overlay. Reads go through
//! `TsView`, a non-owning tuple of (value, overlay, schema, time, path);
//! writes go through `TsOutputView`, which holds the root pair plus a path
//! so every mutation can stamp the full ancestor chain and fan subscriber
//! notifications into the cycle's queue.
//!
//! Navigation is pure: it only extends the path or narrows the borrows,
//! never mutates.

use tickgraph_common::{EngineTime, GraphError, GraphErrorKind, ScalarValue};

use crate::overlay::{NotifyQueue, Overlay};
use crate::path::{Path, PathDisplay, PathSeg};
use crate::ts_meta::{TsKind, TsMeta, TsPayload};
use crate::value::set_storage::hash_key;
use crate::value::{RefValue, SlotId, Value};

/// One output's storage: schema, value and modification overlay.
#[derive(Debug)]
pub struct TsValue {
    pub meta: &'static TsMeta,
    pub value: Value,
    pub overlay: Overlay,
}

impl TsValue {
    pub fn new(meta: &'static TsMeta) -> Self {
        Self {
            meta,
            value: meta.value_schema.construct(),
            overlay: Overlay::new(meta),
        }
    }

    /// Read view at the root position.
    pub fn view(&self, time: EngineTime) -> TsView<'_> {
        TsView {
            value: &self.value,
            overlay: &self.overlay,
            meta: self.meta,
            time,
            path: Path::new(),
        }
    }

    /// Write view at the root position.
    pub fn writer<'a>(&'a mut self, time: EngineTime, queue: &'a mut NotifyQueue) -> TsOutputView<'a> {
        TsOutputView {
            target: self,
            time,
            queue,
            path: Path::new(),
        }
    }

    /// Cycle-boundary housekeeping: recycle slots erased during a cycle in
    /// which this output ticked. Observers have drained by now.
    pub fn end_cycle(&mut self, time: EngineTime) {
        if self.overlay.last_modified_time() == time {
            drain_deferred_value(&mut self.value);
        }
    }
}

fn drain_deferred_value(v: &mut Value) {
    match v {
        Value::Set(s) => s.drain_deferred(),
        Value::Map(m) => {
            m.drain_deferred();
        }
        Value::Bundle(b) => {
            for i in 0..b.len() {
                if let Some(f) = b.field_mut(i) {
                    drain_deferred_value(f);
                }
            }
        }
        Value::List(items) | Value::Tuple(items) => {
            for item in items {
                drain_deferred_value(item);
            }
        }
        _ => {}
    }
}

/* ───────────────────── shape resolution helpers ───────────────────── */

fn nav_error(path: &[PathSeg]) -> GraphError {
    GraphError::new(GraphErrorKind::NotFound).with_path(PathDisplay(path).to_string())
}

/// Schema-only path resolution; no value or overlay required.
pub fn meta_at(meta: &'static TsMeta, path: &[PathSeg]) -> Result<&'static TsMeta, GraphError> {
    let mut cur = meta;
    for seg in path {
        cur = meta_child(cur, *seg)?;
    }
    Ok(cur)
}

pub(crate) fn meta_child(meta: &'static TsMeta, seg: PathSeg) -> Result<&'static TsMeta, GraphError> {
    let child = match (&meta.payload, seg) {
        (TsPayload::Bundle { fields }, PathSeg::Field(i)) => fields.get(i as usize).map(|f| f.meta),
        (TsPayload::List { elem, len }, PathSeg::Item(i)) => {
            if (i as usize) < *len {
                Some(*elem)
            } else {
                None
            }
        }
        (TsPayload::Dict { value, .. }, PathSeg::Slot(_)) => Some(*value),
        _ => None,
    };
    child.ok_or_else(|| {
        GraphError::new(GraphErrorKind::TypeMismatch)
            .with_message(format!("{} has no child at that position", meta.name))
    })
}

fn value_child<'v>(v: &'v Value, seg: PathSeg) -> Option<&'v Value> {
    match (v, seg) {
        (Value::Bundle(b), PathSeg::Field(i)) => b.field(i as usize),
        (Value::List(items), PathSeg::Item(i)) => items.get(i as usize),
        (Value::Map(m), PathSeg::Slot(s)) => m.value_at(s),
        _ => None,
    }
}

fn value_child_mut<'v>(v: &'v mut Value, seg: PathSeg) -> Option<&'v mut Value> {
    match (v, seg) {
        (Value::Bundle(b), PathSeg::Field(i)) => b.field_mut(i as usize),
        (Value::List(items), PathSeg::Item(i)) => items.get_mut(i as usize),
        (Value::Map(m), PathSeg::Slot(s)) => m.value_at_mut(s),
        _ => None,
    }
}

fn resolve<'v>(
    mut value: &'v Value,
    mut meta: &'static TsMeta,
    path: &[PathSeg],
) -> Result<(&'v Value, &'static TsMeta), GraphError> {
    for seg in path {
        meta = meta_child(meta, *seg)?;
        value = value_child(value, *seg).ok_or_else(|| nav_error(path))?;
    }
    Ok((value, meta))
}

fn resolve_mut<'v>(
    mut value: &'v mut Value,
    mut meta: &'static TsMeta,
    path: &[PathSeg],
) -> Result<(&'v mut Value, &'static TsMeta), GraphError> {
    for seg in path {
        meta = meta_child(meta, *seg)?;
        value = value_child_mut(value, *seg).ok_or_else(|| nav_error(path))?;
    }
    Ok((value, meta))
}

/* ───────────────────────── read view ──────────────────────────────── */

/// The collection-specific delta reading of a position.
#[derive(Debug)]
pub enum DeltaValue<'a> {
    /// Scalars and references tick whole; the delta is the value.
    Whole(&'a Value),
    /// Net added/removed/updated elements of a set or dict, by key.
    Keyed {
        added: Vec<&'a ScalarValue>,
        removed: Vec<&'a ScalarValue>,
        updated: Vec<&'a ScalarValue>,
        cleared: bool,
    },
    /// Indices of children modified this cycle (bundle/list).
    Elements(Vec<u32>),
    /// Newest window element this tick.
    Newest(Option<&'a ScalarValue>),
    /// Signals carry no value.
    None,
}

/// Non-owning read view of one position.
#[derive(Debug, Clone)]
pub struct TsView<'a> {
    value: &'a Value,
    overlay: &'a Overlay,
    meta: &'static TsMeta,
    time: EngineTime,
    path: Path,
}

impl<'a> TsView<'a> {
    pub(crate) fn from_parts(
        value: &'a Value,
        overlay: &'a Overlay,
        meta: &'static TsMeta,
        time: EngineTime,
        path: Path,
    ) -> Self {
        Self { value, overlay, meta, time, path }
    }

    #[inline]
    pub fn meta(&self) -> &'static TsMeta {
        self.meta
    }

    #[inline]
    pub fn kind(&self) -> TsKind {
        self.meta.kind
    }

    #[inline]
    pub fn current_time(&self) -> EngineTime {
        self.time
    }

    #[inline]
    pub fn path(&self) -> &[PathSeg] {
        &self.path
    }

    /* ── modification state ── */

    #[inline]
    pub fn modified(&self) -> bool {
        self.overlay.modified_at(self.time)
    }

    #[inline]
    pub fn valid(&self) -> bool {
        self.overlay.valid()
    }

    #[inline]
    pub fn all_valid(&self) -> bool {
        self.overlay.all_valid()
    }

    #[inline]
    pub fn last_modified_time(&self) -> EngineTime {
        self.overlay.last_modified_time()
    }

    /* ── value access ── */

    pub fn value_raw(&self) -> &'a Value {
        self.value
    }

    pub fn scalar(&self) -> Result<&'a ScalarValue, GraphError> {
        self.value.expect_scalar()
    }

    pub fn ref_value(&self) -> Result<&'a RefValue, GraphError> {
        self.value.as_ref_value().ok_or_else(|| {
            GraphError::new(GraphErrorKind::TypeMismatch)
                .with_message(format!("{} is not a reference", self.meta.name))
        })
    }

    /* ── navigation (pure) ── */

    fn descend(&self, seg: PathSeg) -> Result<TsView<'a>, GraphError> {
        let meta = meta_child(self.meta, seg)?;
        let value = value_child(self.value, seg).ok_or_else(|| nav_error(&[seg]))?;
        let overlay = self.overlay.child(seg).ok_or_else(|| nav_error(&[seg]))?;
        let mut path = self.path.clone();
        path.push(seg);
        Ok(TsView { value, overlay, meta, time: self.time, path })
    }

    /// Resolve a multi-segment path below this position.
    pub fn at_path(&self, path: &[PathSeg]) -> Result<TsView<'a>, GraphError> {
        let mut cur = self.clone();
        for seg in path {
            cur = cur.descend(*seg)?;
        }
        Ok(cur)
    }

    pub fn field(&self, name: &str) -> Result<TsView<'a>, GraphError> {
        let idx = self.meta.field_index(name).ok_or_else(|| {
            GraphError::new(GraphErrorKind::NotFound)
                .with_message(format!("no field {name} on {}", self.meta.name))
        })?;
        self.descend(PathSeg::Field(idx as u16))
    }

    pub fn field_at(&self, index: usize) -> Result<TsView<'a>, GraphError> {
        self.descend(PathSeg::Field(index as u16))
    }

    pub fn item(&self, index: usize) -> Result<TsView<'a>, GraphError> {
        self.descend(PathSeg::Item(index as u32))
    }

    /// Dict navigation by key; resolves to the element's stable slot.
    pub fn key(&self, key: &ScalarValue) -> Result<TsView<'a>, GraphError> {
        let map = self.value.as_map().ok_or_else(|| {
            GraphError::new(GraphErrorKind::TypeMismatch)
                .with_message(format!("{} is not a dict", self.meta.name))
        })?;
        let slot = map.lookup(key).ok_or_else(|| {
            GraphError::new(GraphErrorKind::NotFound).with_message(format!("no key {key}"))
        })?;
        self.descend(PathSeg::Slot(slot))
    }

    pub fn slot(&self, slot: SlotId) -> Result<TsView<'a>, GraphError> {
        self.descend(PathSeg::Slot(slot))
    }

    /* ── set reads ── */

    pub fn set_len(&self) -> Result<usize, GraphError> {
        Ok(self.require_set()?.len())
    }

    pub fn set_contains(&self, key: &ScalarValue) -> Result<bool, GraphError> {
        Ok(self.require_set()?.contains(key))
    }

    pub fn set_values(&self) -> Result<Vec<&'a ScalarValue>, GraphError> {
        Ok(self.require_set()?.iter().map(|(_, k)| k).collect())
    }

    pub fn was_added(&self, key: &ScalarValue) -> Result<bool, GraphError> {
        let (set, tracker) = (self.require_set()?, self.require_tracker()?);
        Ok(set
            .lookup(key)
            .map(|slot| tracker.was_added(slot))
            .unwrap_or(false))
    }

    pub fn was_removed(&self, key: &ScalarValue) -> Result<bool, GraphError> {
        Ok(self.require_tracker()?.was_key_removed(hash_key(key)))
    }

    fn require_set(&self) -> Result<&'a crate::value::SetStorage, GraphError> {
        self.value.as_set().ok_or_else(|| {
            GraphError::new(GraphErrorKind::TypeMismatch)
                .with_message(format!("{} is not a set", self.meta.name))
        })
    }

    fn require_tracker(&self) -> Result<&'a crate::delta::DeltaTracker, GraphError> {
        self.overlay.tracker().ok_or_else(|| {
            GraphError::new(GraphErrorKind::InvariantViolation)
                .with_message("collection without delta tracker")
        })
    }

    /* ── dict reads ── */

    pub fn dict_len(&self) -> Result<usize, GraphError> {
        Ok(self.require_map()?.len())
    }

    pub fn dict_contains(&self, key: &ScalarValue) -> Result<bool, GraphError> {
        Ok(self.require_map()?.contains(key))
    }

    pub fn dict_keys(&self) -> Result<Vec<&'a ScalarValue>, GraphError> {
        Ok(self.require_map()?.keys().iter().map(|(_, k)| k).collect())
    }

    fn require_map(&self) -> Result<&'a crate::value::MapStorage, GraphError> {
        self.value.as_map().ok_or_else(|| {
            GraphError::new(GraphErrorKind::TypeMismatch)
                .with_message(format!("{} is not a dict", self.meta.name))
        })
    }

    /* ── window reads ── */

    pub fn window_len(&self) -> Result<usize, GraphError> {
        Ok(self.require_window()?.len())
    }

    pub fn window_values(&self) -> Result<&'a [ScalarValue], GraphError> {
        Ok(self.require_window()?.values())
    }

    pub fn value_times(&self) -> Result<&'a [EngineTime], GraphError> {
        Ok(self.require_window()?.value_times())
    }

    pub fn element(&self, index: usize) -> Result<&'a ScalarValue, GraphError> {
        self.require_window()?
            .get(index)
            .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound))
    }

    pub fn has_removed_value(&self) -> Result<bool, GraphError> {
        Ok(self.require_window()?.has_removed_value())
    }

    pub fn removed_value_count(&self) -> Result<usize, GraphError> {
        Ok(self.require_window()?.removed_value_count())
    }

    pub fn removed_values(&self) -> Result<Vec<&'a ScalarValue>, GraphError> {
        Ok(self.require_window()?.removed_values().collect())
    }

    pub fn first_modified_time(&self) -> Result<Option<EngineTime>, GraphError> {
        Ok(self.require_window()?.first_modified_time())
    }

    fn require_window(&self) -> Result<&'a crate::value::WindowStorage, GraphError> {
        self.value.as_window().ok_or_else(|| {
            GraphError::new(GraphErrorKind::TypeMismatch)
                .with_message(format!("{} is not a window", self.meta.name))
        })
    }

    /* ── delta ── */

    /// The collection-specific partial reading of this cycle's change. For
    /// scalars and references it equals the value.
    pub fn delta_value(&self) -> DeltaValue<'a> {
        match self.meta.kind {
            TsKind::Ts | TsKind::Ref => DeltaValue::Whole(self.value),
            TsKind::Signal => DeltaValue::None,
            TsKind::Tsw => DeltaValue::Newest(
                self.value.as_window().and_then(|w| {
                    if w.last_modified_time() == Some(self.time) {
                        w.newest()
                    } else {
                        None
                    }
                }),
            ),
            TsKind::Tsb | TsKind::Tsl => DeltaValue::Elements(
                self.overlay
                    .element_delta()
                    .map(|d| d.modified_children().to_vec())
                    .unwrap_or_default(),
            ),
            TsKind::Tss => self.keyed_delta(|slot| {
                self.value.as_set().and_then(|s| s.key_at(slot))
            }),
            TsKind::Tsd => self.keyed_delta(|slot| {
                self.value.as_map().and_then(|m| m.key_at(slot))
            }),
        }
    }

    fn keyed_delta(&self, key_of: impl Fn(SlotId) -> Option<&'a ScalarValue>) -> DeltaValue<'a> {
        let Some(tracker) = self.overlay.tracker() else {
            return DeltaValue::None;
        };
        // A stale tracker (last mutated in an earlier cycle than this
        // position's tick) reads as empty.
        let live = tracker.tick() == self.overlay.last_modified_time();
        let collect = |slots: &[SlotId]| -> Vec<&'a ScalarValue> {
            if !live {
                return Vec::new();
            }
            slots.iter().filter_map(|&s| key_of(s)).collect()
        };
        DeltaValue::Keyed {
            added: collect(tracker.added_slots()),
            removed: collect(tracker.removed_slots()),
            updated: collect(tracker.updated_slots()),
            cleared: live && tracker.was_cleared(),
        }
    }
}

/// A kind-specific partial update, the payload form a node body may hand
/// back for application to its output.
#[derive(Debug, Clone)]
pub enum ValueDelta {
    /// Whole-position assignment.
    Replace(Value),
    /// Set elements to add.
    Add(Vec<ScalarValue>),
    /// Set elements to remove.
    Remove(Vec<ScalarValue>),
    /// Dict entries to insert or overwrite.
    Put(Vec<(ScalarValue, Value)>),
    /// Dict keys to remove.
    RemoveKeys(Vec<ScalarValue>),
    /// Values to append to a window.
    Append(Vec<ScalarValue>),
    /// Rebind a reference position.
    Rebind(RefValue),
    /// Empty the collection (still an observable tick).
    Clear,
}

/* ───────────────────────── write view ─────────────────────────────── */

/// Mutable view rooted at an output. Navigation extends the path; every
/// write stamps the full ancestor chain and fans notifications.
pub struct TsOutputView<'a> {
    target: &'a mut TsValue,
    time: EngineTime,
    queue: &'a mut NotifyQueue,
    path: Path,
}

impl<'a> TsOutputView<'a> {
    #[inline]
    pub fn current_time(&self) -> EngineTime {
        self.time
    }

    /// Schema at the current position.
    pub fn meta(&self) -> Result<&'static TsMeta, GraphError> {
        let mut meta = self.target.meta;
        for seg in &self.path {
            meta = meta_child(meta, *seg)?;
        }
        Ok(meta)
    }

    /// Read view of the current position.
    pub fn view(&self) -> Result<TsView<'_>, GraphError> {
        let (value, meta) = resolve(&self.target.value, self.target.meta, &self.path)?;
        let overlay = self
            .target
            .overlay
            .resolve(&self.path)
            .ok_or_else(|| nav_error(&self.path))?;
        Ok(TsView::from_parts(value, overlay, meta, self.time, self.path.clone()))
    }

    /* ── navigation (consuming; keeps the root borrow alive) ── */

    fn extended(mut self, seg: PathSeg) -> Result<TsOutputView<'a>, GraphError> {
        let meta = self.meta()?;
        meta_child(meta, seg)?;
        self.path.push(seg);
        Ok(self)
    }

    pub fn at_field(self, name: &str) -> Result<TsOutputView<'a>, GraphError> {
        let meta = self.meta()?;
        let idx = meta.field_index(name).ok_or_else(|| {
            GraphError::new(GraphErrorKind::NotFound)
                .with_message(format!("no field {name} on {}", meta.name))
        })?;
        self.extended(PathSeg::Field(idx as u16))
    }

    pub fn at_item(self, index: usize) -> Result<TsOutputView<'a>, GraphError> {
        self.extended(PathSeg::Item(index as u32))
    }

    pub fn at_key(self, key: &ScalarValue) -> Result<TsOutputView<'a>, GraphError> {
        let (value, _) = resolve(&self.target.value, self.target.meta, &self.path)?;
        let slot = value
            .as_map()
            .and_then(|m| m.lookup(key))
            .ok_or_else(|| GraphError::new(GraphErrorKind::NotFound).with_message(format!("no key {key}")))?;
        self.extended(PathSeg::Slot(slot))
    }

    /* ── whole-position writes ── */

    /// Assign a complete value at the current position. Composite kinds
    /// decompose into per-child writes so change tracking stays precise;
    /// windows only accept `push`.
    pub fn set_value(&mut self, v: &Value) -> Result<(), GraphError> {
        let path = self.path.clone();
        assign_at(self.target, &path, v, self.time, self.queue)
    }

    pub fn set_scalar(&mut self, s: ScalarValue) -> Result<(), GraphError> {
        self.set_value(&Value::Scalar(s))
    }

    /// Tick a signal position (no value).
    pub fn tick(&mut self) -> Result<(), GraphError> {
        let meta = self.meta()?;
        if meta.kind != TsKind::Signal {
            return Err(GraphError::new(GraphErrorKind::TypeMismatch)
                .with_message(format!("tick on {}", meta.name)));
        }
        self.mark()
    }

    pub fn set_ref(&mut self, r: RefValue) -> Result<(), GraphError> {
        let path = self.path.clone();
        let (value, meta) = resolve_mut(&mut self.target.value, self.target.meta, &path)?;
        if meta.kind != TsKind::Ref {
            return Err(GraphError::new(GraphErrorKind::TypeMismatch)
                .with_message(format!("set_ref on {}", meta.name)));
        }
        *value = Value::Ref(r);
        self.mark()
    }

    /// Reset the position to never-written.
    pub fn invalidate(&mut self) -> Result<(), GraphError> {
        let path = self.path.clone();
        let overlay = self
            .target
            .overlay
            .resolve_mut(&path)
            .ok_or_else(|| nav_error(&path))?;
        overlay.invalidate()
    }

    /* ── set writes ── */

    pub fn insert(&mut self, key: ScalarValue) -> Result<bool, GraphError> {
        let path = self.path.clone();
        set_insert(self.target, &path, key, self.time, self.queue)
    }

    pub fn remove(&mut self, key: &ScalarValue) -> Result<bool, GraphError> {
        let path = self.path.clone();
        set_remove(self.target, &path, key, self.time, self.queue)
    }

    /// Clear the collection. An explicit empty tick is permitted: clearing
    /// an empty set still marks the position modified.
    pub fn clear(&mut self) -> Result<(), GraphError> {
        let path = self.path.clone();
        collection_clear(self.target, &path, self.time, self.queue)
    }

    /* ── dict writes ── */

    pub fn upsert(&mut self, key: ScalarValue, v: &Value) -> Result<(), GraphError> {
        let path = self.path.clone();
        dict_upsert(self.target, &path, key, v, self.time, self.queue)
    }

    pub fn remove_key(&mut self, key: &ScalarValue) -> Result<bool, GraphError> {
        let path = self.path.clone();
        dict_remove(self.target, &path, key, self.time, self.queue)
    }

    /* ── window writes ── */

    pub fn push(&mut self, v: ScalarValue) -> Result<(), GraphError> {
        let path = self.path.clone();
        let (value, meta) = resolve_mut(&mut self.target.value, self.target.meta, &path)?;
        let w = value.as_window_mut().ok_or_else(|| {
            GraphError::new(GraphErrorKind::TypeMismatch)
                .with_message(format!("push on {}", meta.name))
        })?;
        w.push(v, self.time);
        self.mark()
    }

    /// Apply a collection-specific partial update. Same post-conditions as
    /// the typed write methods it dispatches to.
    pub fn apply_delta(&mut self, delta: &ValueDelta) -> Result<(), GraphError> {
        match delta {
            ValueDelta::Replace(v) => self.set_value(v),
            ValueDelta::Add(keys) => {
                for k in keys {
                    self.insert(k.clone())?;
                }
                Ok(())
            }
            ValueDelta::Remove(keys) => {
                for k in keys {
                    self.remove(k)?;
                }
                Ok(())
            }
            ValueDelta::Put(entries) => {
                for (k, v) in entries {
                    self.upsert(k.clone(), v)?;
                }
                Ok(())
            }
            ValueDelta::RemoveKeys(keys) => {
                for k in keys {
                    self.remove_key(k)?;
                }
                Ok(())
            }
            ValueDelta::Append(values) => {
                for v in values {
                    self.push(v.clone())?;
                }
                Ok(())
            }
            ValueDelta::Rebind(r) => self.set_ref(r.clone()),
            ValueDelta::Clear => self.clear(),
        }
    }

    /* ── helpers ── */

    fn mark(&mut self) -> Result<(), GraphError> {
        self.target
            .overlay
            .mark_modified(&self.path, self.time, self.queue)
    }
}

/* ───────────────── write implementations (free fns) ───────────────── */

fn assign_at(
    target: &mut TsValue,
    path: &Path,
    v: &Value,
    time: EngineTime,
    queue: &mut NotifyQueue,
) -> Result<(), GraphError> {
    let meta = {
        let mut m = target.meta;
        for seg in path {
            m = meta_child(m, *seg)?;
        }
        m
    };
    match (&meta.payload, v) {
        (TsPayload::Scalar { value_type }, Value::Scalar(_)) => {
            let (slot, _) = resolve_mut(&mut target.value, target.meta, path)?;
            value_type.copy_assign(slot, v)?;
            target.overlay.mark_modified(path, time, queue)
        }
        (TsPayload::Signal, _) => target.overlay.mark_modified(path, time, queue),
        (TsPayload::Ref { .. }, Value::Ref(r)) => {
            let (slot, _) = resolve_mut(&mut target.value, target.meta, path)?;
            *slot = Value::Ref(r.clone());
            target.overlay.mark_modified(path, time, queue)
        }
        (TsPayload::Bundle { fields }, Value::Bundle(b)) => {
            if b.len() != fields.len() {
                return Err(GraphError::new(GraphErrorKind::TypeMismatch)
                    .with_message(format!("bundle arity mismatch for {}", meta.name)));
            }
            for i in 0..fields.len() {
                let mut child = path.clone();
                child.push(PathSeg::Field(i as u16));
                let fv = b.field(i).expect("checked arity");
                assign_at(target, &child, fv, time, queue)?;
            }
            Ok(())
        }
        (TsPayload::List { len, .. }, Value::List(items)) => {
            if items.len() != *len {
                return Err(GraphError::new(GraphErrorKind::TypeMismatch)
                    .with_message(format!("list arity mismatch for {}", meta.name)));
            }
            for (i, item) in items.iter().enumerate() {
                let mut child = path.clone();
                child.push(PathSeg::Item(i as u32));
                assign_at(target, &child, item, time, queue)?;
            }
            Ok(())
        }
        (TsPayload::Set { .. }, Value::Set(new)) => {
            // Decompose into element ops so the delta stays exact.
            let to_remove: Vec<ScalarValue> = {
                let (cur, _) = resolve(&target.value, target.meta, path)?;
                let cur = cur.as_set().expect("set shape");
                cur.iter()
                    .filter(|(_, k)| !new.contains(k))
                    .map(|(_, k)| k.clone())
                    .collect()
            };
            for k in to_remove {
                set_remove(target, path, &k, time, queue)?;
            }
            let to_add: Vec<ScalarValue> = new.iter().map(|(_, k)| k.clone()).collect();
            for k in to_add {
                set_insert(target, path, k, time, queue)?;
            }
            target.overlay.mark_modified(path, time, queue)
        }
        (TsPayload::Dict { .. }, Value::Map(new)) => {
            let to_remove: Vec<ScalarValue> = {
                let (cur, _) = resolve(&target.value, target.meta, path)?;
                let cur = cur.as_map().expect("dict shape");
                cur.keys()
                    .iter()
                    .filter(|(_, k)| !new.contains(k))
                    .map(|(_, k)| k.clone())
                    .collect()
            };
            for k in to_remove {
                dict_remove(target, path, &k, time, queue)?;
            }
            let entries: Vec<(ScalarValue, Value)> = new
                .iter()
                .map(|(_, k, v)| (k.clone(), v.clone()))
                .collect();
            for (k, v) in entries {
                dict_upsert(target, path, k, &v, time, queue)?;
            }
            Ok(())
        }
        (TsPayload::Window { .. }, _) => Err(GraphError::new(GraphErrorKind::TypeMismatch)
            .with_message("windows accept push, not assignment")),
        _ => Err(GraphError::new(GraphErrorKind::TypeMismatch)
            .with_message(format!("value does not match schema {}", meta.name))),
    }
}

fn set_insert(
    target: &mut TsValue,
    path: &Path,
    key: ScalarValue,
    time: EngineTime,
    queue: &mut NotifyQueue,
) -> Result<bool, GraphError> {
    let slot = {
        let (value, meta) = resolve_mut(&mut target.value, target.meta, path)?;
        let set = value.as_set_mut().ok_or_else(|| {
            GraphError::new(GraphErrorKind::TypeMismatch)
                .with_message(format!("insert on {}", meta.name))
        })?;
        if set.contains(&key) {
            return Ok(false);
        }
        match set.deferred_slot_for(&key) {
            // Removed earlier this cycle: restore the same slot so the
            // cancellation nets out to an update.
            Some(slot) => {
                set.reinsert_at(slot, key)?;
                slot
            }
            None => set.insert(key).slot,
        }
    };
    let overlay = target
        .overlay
        .resolve_mut(path)
        .ok_or_else(|| nav_error(path))?;
    overlay
        .tracker_mut()
        .ok_or_else(|| GraphError::new(GraphErrorKind::InvariantViolation))?
        .on_insert(slot, time);
    target.overlay.mark_modified(path, time, queue)?;
    Ok(true)
}

fn set_remove(
    target: &mut TsValue,
    path: &Path,
    key: &ScalarValue,
    time: EngineTime,
    queue: &mut NotifyQueue,
) -> Result<bool, GraphError> {
    let hash = hash_key(key);
    let slot = {
        let (value, meta) = resolve_mut(&mut target.value, target.meta, path)?;
        let set = value.as_set_mut().ok_or_else(|| {
            GraphError::new(GraphErrorKind::TypeMismatch)
                .with_message(format!("remove on {}", meta.name))
        })?;
        match set.erase(key) {
            Some(slot) => slot,
            None => return Ok(false),
        }
    };
    let overlay = target
        .overlay
        .resolve_mut(path)
        .ok_or_else(|| nav_error(path))?;
    overlay
        .tracker_mut()
        .ok_or_else(|| GraphError::new(GraphErrorKind::InvariantViolation))?
        .on_erase(slot, hash, time);
    target.overlay.mark_modified(path, time, queue)?;
    Ok(true)
}

fn collection_clear(
    target: &mut TsValue,
    path: &Path,
    time: EngineTime,
    queue: &mut NotifyQueue,
) -> Result<(), GraphError> {
    let cleared: Vec<(SlotId, u64)> = {
        let (value, meta) = resolve_mut(&mut target.value, target.meta, path)?;
        match value {
            Value::Set(s) => {
                let slots = s.clear();
                slots
                    .into_iter()
                    .map(|slot| (slot, s.key_at(slot).map(hash_key).unwrap_or(0)))
                    .collect()
            }
            Value::Map(m) => {
                let slots = m.clear();
                slots
                    .into_iter()
                    .map(|slot| (slot, m.key_at(slot).map(hash_key).unwrap_or(0)))
                    .collect()
            }
            _ => {
                return Err(GraphError::new(GraphErrorKind::TypeMismatch)
                    .with_message(format!("clear on {}", meta.name)))
            }
        }
    };
    let overlay = target
        .overlay
        .resolve_mut(path)
        .ok_or_else(|| nav_error(path))?;
    let tracker = overlay
        .tracker_mut()
        .ok_or_else(|| GraphError::new(GraphErrorKind::InvariantViolation))?;
    // Cleared flag first so subscribers can see it before the per-slot
    // erases replay.
    tracker.on_clear(time);
    for (slot, hash) in cleared {
        tracker.on_erase(slot, hash, time);
    }
    target.overlay.mark_modified(path, time, queue)
}

fn dict_upsert(
    target: &mut TsValue,
    path: &Path,
    key: ScalarValue,
    v: &Value,
    time: EngineTime,
    queue: &mut NotifyQueue,
) -> Result<(), GraphError> {
    enum Outcome {
        Inserted(SlotId),
        Reinserted(SlotId),
        Updated(SlotId),
    }
    let child_schema = {
        let mut m = target.meta;
        for seg in path {
            m = meta_child(m, *seg)?;
        }
        m.dict_types()
            .ok_or_else(|| {
                GraphError::new(GraphErrorKind::TypeMismatch)
                    .with_message(format!("upsert on {}", m.name))
            })?
            .1
    };
    let outcome = {
        let (value, _) = resolve_mut(&mut target.value, target.meta, path)?;
        let map = value
            .as_map_mut()
            .ok_or_else(|| GraphError::new(GraphErrorKind::TypeMismatch))?;
        if let Some(slot) = map.lookup(&key) {
            Outcome::Updated(slot)
        } else if let Some(slot) = map.deferred_slot_for(&key) {
            map.reinsert_at(slot, key.clone(), child_schema.value_schema.construct())?;
            Outcome::Reinserted(slot)
        } else {
            let w = map.upsert(key.clone(), child_schema.value_schema.construct());
            Outcome::Inserted(w.slot())
        }
    };
    let overlay = target
        .overlay
        .resolve_mut(path)
        .ok_or_else(|| nav_error(path))?;
    let slot = match outcome {
        Outcome::Inserted(slot) => {
            // Fresh element: a recycled slot must not inherit the previous
            // element's modification history.
            overlay.ensure_slot(slot)?;
            overlay.reset_slot(slot);
            overlay
                .tracker_mut()
                .ok_or_else(|| GraphError::new(GraphErrorKind::InvariantViolation))?
                .on_insert(slot, time);
            slot
        }
        Outcome::Reinserted(slot) => {
            overlay.ensure_slot(slot)?;
            overlay
                .tracker_mut()
                .ok_or_else(|| GraphError::new(GraphErrorKind::InvariantViolation))?
                .on_insert(slot, time);
            slot
        }
        Outcome::Updated(slot) => {
            overlay.ensure_slot(slot)?;
            overlay
                .tracker_mut()
                .ok_or_else(|| GraphError::new(GraphErrorKind::InvariantViolation))?
                .on_update(slot, time);
            slot
        }
    };
    let mut child = path.clone();
    child.push(PathSeg::Slot(slot));
    assign_at(target, &child, v, time, queue)
}

fn dict_remove(
    target: &mut TsValue,
    path: &Path,
    key: &ScalarValue,
    time: EngineTime,
    queue: &mut NotifyQueue,
) -> Result<bool, GraphError> {
    let hash = hash_key(key);
    let slot = {
        let (value, meta) = resolve_mut(&mut target.value, target.meta, path)?;
        let map = value.as_map_mut().ok_or_else(|| {
            GraphError::new(GraphErrorKind::TypeMismatch)
                .with_message(format!("remove_key on {}", meta.name))
        })?;
        match map.erase(key) {
            Some(slot) => slot,
            None => return Ok(false),
        }
    };
    let overlay = target
        .overlay
        .resolve_mut(path)
        .ok_or_else(|| nav_error(path))?;
    overlay
        .tracker_mut()
        .ok_or_else(|| GraphError::new(GraphErrorKind::InvariantViolation))?
        .on_erase(slot, hash, time);
    target.overlay.mark_modified(path, time, queue)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{float_type, int_type};
    use crate::ts_meta::{ts, tsb, tss};
    use crate::SetStorage;

    fn t(us: i64) -> EngineTime {
        EngineTime::from_micros(us)
    }

    fn int(v: i64) -> ScalarValue {
        ScalarValue::Int(v)
    }

    #[test]
    fn scalar_write_marks_and_notifies() {
        let mut out = TsValue::new(ts(int_type()));
        let mut q = NotifyQueue::new();
        out.overlay
            .subscribe(&[], crate::overlay::SubscriberId { node: 3, link: 0 })
            .unwrap();
        out.writer(t(5), &mut q).set_scalar(int(42)).unwrap();

        let view = out.view(t(5));
        assert!(view.valid());
        assert!(view.modified());
        assert_eq!(view.scalar().unwrap(), &int(42));
        assert_eq!(q.drain().count(), 1);
    }

    #[test]
    fn wrong_scalar_kind_is_a_schema_error() {
        let mut out = TsValue::new(ts(int_type()));
        let mut q = NotifyQueue::new();
        let err = out
            .writer(t(0), &mut q)
            .set_scalar(ScalarValue::Float(1.0))
            .unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::TypeMismatch);
        assert!(!out.view(t(0)).valid());
    }

    #[test]
    fn bundle_field_write_bubbles_to_the_root() {
        let meta = tsb(vec![
            ("bid".to_string(), ts(float_type())),
            ("ask".to_string(), ts(float_type())),
        ]);
        let mut out = TsValue::new(meta);
        let mut q = NotifyQueue::new();
        out.writer(t(7), &mut q)
            .at_field("ask")
            .unwrap()
            .set_scalar(ScalarValue::Float(100.25))
            .unwrap();

        let view = out.view(t(7));
        assert!(view.modified());
        assert!(view.field("ask").unwrap().modified());
        assert!(!view.field("bid").unwrap().modified());
        assert!(!view.all_valid());
    }

    #[test]
    fn set_assignment_diffs_against_current_contents() {
        let meta = tss(int_type()).unwrap();
        let mut out = TsValue::new(meta);
        let mut q = NotifyQueue::new();
        {
            let mut w = out.writer(t(0), &mut q);
            w.insert(int(1)).unwrap();
            w.insert(int(2)).unwrap();
        }
        // Assign {2, 3}: 1 removed, 3 added, 2 untouched.
        let mut replacement = SetStorage::new();
        replacement.insert(int(2));
        replacement.insert(int(3));
        out.writer(t(10), &mut q)
            .set_value(&Value::Set(replacement))
            .unwrap();

        let view = out.view(t(10));
        assert_eq!(view.set_len().unwrap(), 2);
        assert!(view.was_added(&int(3)).unwrap());
        assert!(view.was_removed(&int(1)).unwrap());
        assert!(!view.was_added(&int(2)).unwrap());
    }

    #[test]
    fn apply_delta_dispatches_per_kind() {
        let meta = tss(int_type()).unwrap();
        let mut out = TsValue::new(meta);
        let mut q = NotifyQueue::new();
        out.writer(t(0), &mut q)
            .apply_delta(&ValueDelta::Add(vec![int(1), int(2)]))
            .unwrap();
        out.writer(t(1), &mut q)
            .apply_delta(&ValueDelta::Remove(vec![int(1)]))
            .unwrap();
        let view = out.view(t(1));
        assert_eq!(view.set_len().unwrap(), 1);
        assert!(view.set_contains(&int(2)).unwrap());
    }

    #[test]
    fn window_rejects_whole_assignment() {
        let meta = crate::ts_meta::tsw_ticks(int_type(), 2).unwrap();
        let mut out = TsValue::new(meta);
        let mut q = NotifyQueue::new();
        let err = out
            .writer(t(0), &mut q)
            .set_value(&Value::from(1i64))
            .unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::TypeMismatch);
        out.writer(t(0), &mut q).push(int(1)).unwrap();
        assert_eq!(out.view(t(0)).window_len().unwrap(), 1);
    }

    #[test]
    fn invalidate_resets_a_leaf() {
        let mut out = TsValue::new(ts(int_type()));
        let mut q = NotifyQueue::new();
        out.writer(t(3), &mut q).set_scalar(int(9)).unwrap();
        assert!(out.view(t(3)).valid());
        out.writer(t(4), &mut q).invalidate().unwrap();
        assert!(!out.view(t(4)).valid());
        assert_eq!(out.view(t(4)).last_modified_time(), tickgraph_common::MIN_DT);
    }
}
