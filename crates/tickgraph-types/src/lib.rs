//! Typed value model for the tickgraph runtime.
//!
//! Layers, leaves first:
//! - [`type_meta`] / [`registry`]: interned, self-describing type descriptors
//!   with a vtable of type-erased operations.
//! - [`value`]: owned storage for every kind, including the slot-disciplined
//!   set/map stores, ring windows and reference payloads.
//! - [`ts_meta`]: the parallel descriptor tree for time-series shapes.
//! - [`delta`] / [`overlay`]: per-position modification state, subscriber
//!   lists and per-collection change tracking.
//! - [`view`]: the non-owning read/write surface that ties value, overlay,
//!   schema, engine time and path together.

pub mod delta;
pub mod overlay;
pub mod path;
pub mod registry;
pub mod ts_meta;
pub mod type_meta;
pub mod value;
pub mod view;

pub use delta::{DeltaTracker, ElementDelta};
pub use overlay::{NotifyQueue, ObserverList, Overlay, SubscriberId};
pub use path::{Path, PathSeg};
pub use registry::{
    bool_type, duration_type, float_type, int_type, registry, str_type, time_type, TypeRegistry,
};
pub use ts_meta::{
    same_ts_meta, signal, ts, ts_ref, tsb, tsd, tsl, tss, tsw_duration, tsw_ticks, TsKind, TsMeta,
};
pub use type_meta::{
    same_type, FieldMeta, HostValue, TypeFlags, TypeKind, TypeMeta, TypeOps, TypePayload,
    WindowSpec,
};
pub use value::{
    BundleStorage, MapStorage, OutputKey, RefValue, SetStorage, SlotId, Value, WindowStorage,
};
pub use view::{DeltaValue, TsOutputView, TsValue, TsView, ValueDelta};
