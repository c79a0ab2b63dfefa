//! Meta crate that re-exports the tickgraph layers with sensible defaults.
//! Downstream users can depend on this crate alone and keep access to the
//! underlying crates when deeper integration is required.

pub use tickgraph_common as common;
pub use tickgraph_runtime as runtime;
pub use tickgraph_types as types;

pub use tickgraph_common::{
    EngineTime, EngineTimeDelta, GraphError, GraphErrorKind, ScalarKind, ScalarValue, MAX_DT,
    MIN_DT,
};
pub use tickgraph_runtime::{
    EngineConfig, EvaluationMode, GraphBuilder, GraphEngine, InputView, LifecycleObserver,
    NodeBody, NodeHandle, NodeKind, NodeScheduler, NodeSignature, ProfileObserver, PushSender,
    TraceObserver,
};
pub use tickgraph_types::{
    bool_type, float_type, int_type, registry, signal, str_type, time_type, ts, ts_ref, tsb, tsd,
    tsl, tss, tsw_duration, tsw_ticks, DeltaValue, RefValue, TsKind, TsMeta, TsValue, TsView,
    Value, ValueDelta,
};
