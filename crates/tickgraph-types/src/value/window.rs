//! Ring-buffer window storage with parallel timestamps.
//!
//! Two bounding variants share one layout: tick-count windows evict the
//! oldest element when a push exceeds the capacity; duration windows evict
//! from the tail while the oldest element is older than the duration.
//!
//! Evictions are recorded alongside the engine time of the cycle that caused
//! them and clear lazily on the first push of a later cycle, so subscribers
//! can read `removed_values` after the cycle completes.

use tickgraph_common::{EngineTime, ScalarValue};

use crate::type_meta::WindowSpec;

#[derive(Debug, Clone)]
pub struct WindowStorage {
    spec: WindowSpec,
    values: Vec<ScalarValue>,
    times: Vec<EngineTime>,
    /// Evictions from the most recent cycle that pushed.
    removed: Vec<(ScalarValue, EngineTime)>,
    removed_tick: EngineTime,
}

impl WindowStorage {
    pub fn new(spec: WindowSpec) -> Self {
        Self {
            spec,
            values: Vec::new(),
            times: Vec::new(),
            removed: Vec::new(),
            removed_tick: tickgraph_common::MIN_DT,
        }
    }

    #[inline]
    pub fn spec(&self) -> WindowSpec {
        self.spec
    }

    /// Number of resident elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Configured bound: tick capacity, or usize::MAX for duration windows.
    pub fn capacity(&self) -> usize {
        match self.spec {
            WindowSpec::Ticks(n) => n,
            WindowSpec::Duration(_) => usize::MAX,
        }
    }

    /// Oldest-first element access.
    pub fn get(&self, index: usize) -> Option<&ScalarValue> {
        self.values.get(index)
    }

    pub fn time_at(&self, index: usize) -> Option<EngineTime> {
        self.times.get(index).copied()
    }

    pub fn values(&self) -> &[ScalarValue] {
        &self.values
    }

    /// Timestamps parallel to `values()`, oldest first.
    pub fn value_times(&self) -> &[EngineTime] {
        &self.times
    }

    pub fn first_modified_time(&self) -> Option<EngineTime> {
        self.times.first().copied()
    }

    pub fn last_modified_time(&self) -> Option<EngineTime> {
        self.times.last().copied()
    }

    /// Newest element pushed this tick; the window's delta value.
    pub fn newest(&self) -> Option<&ScalarValue> {
        self.values.last()
    }

    /// Push a value stamped at `now`, evicting per the bounding rule.
    pub fn push(&mut self, value: ScalarValue, now: EngineTime) {
        if self.removed_tick != now {
            self.removed.clear();
            self.removed_tick = now;
        }
        self.values.push(value);
        self.times.push(now);
        match self.spec {
            WindowSpec::Ticks(n) => {
                while self.values.len() > n {
                    let v = self.values.remove(0);
                    let t = self.times.remove(0);
                    self.removed.push((v, t));
                }
            }
            WindowSpec::Duration(d) => {
                while let Some(&oldest) = self.times.first() {
                    if now - oldest > d {
                        let v = self.values.remove(0);
                        let t = self.times.remove(0);
                        self.removed.push((v, t));
                    } else {
                        break;
                    }
                }
            }
        }
    }

    pub fn has_removed_value(&self) -> bool {
        !self.removed.is_empty()
    }

    pub fn removed_value_count(&self) -> usize {
        self.removed.len()
    }

    /// Values evicted by the most recent pushing cycle, oldest first.
    pub fn removed_values(&self) -> impl Iterator<Item = &ScalarValue> {
        self.removed.iter().map(|(v, _)| v)
    }

    pub fn removed_value(&self) -> Option<&ScalarValue> {
        self.removed.first().map(|(v, _)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickgraph_common::EngineTimeDelta;

    fn t(us: i64) -> EngineTime {
        EngineTime::from_micros(us)
    }

    #[test]
    fn tick_window_evicts_oldest() {
        let mut w = WindowStorage::new(WindowSpec::Ticks(3));
        for (i, v) in [10i64, 20, 30, 40].iter().enumerate() {
            w.push(ScalarValue::Int(*v), t(i as i64));
        }
        assert_eq!(w.len(), 3);
        assert_eq!(
            w.values(),
            &[ScalarValue::Int(20), ScalarValue::Int(30), ScalarValue::Int(40)]
        );
        assert!(w.has_removed_value());
        assert_eq!(w.removed_value(), Some(&ScalarValue::Int(10)));
    }

    #[test]
    fn duration_window_keeps_young_elements() {
        let mut w = WindowStorage::new(WindowSpec::Duration(EngineTimeDelta::from_micros(100)));
        w.push(ScalarValue::Int(1), t(0));
        w.push(ScalarValue::Int(2), t(50));
        // Zero elapsed time: nothing may evict regardless of push count.
        assert!(!w.has_removed_value());
        w.push(ScalarValue::Int(3), t(200));
        assert_eq!(w.len(), 2);
        assert_eq!(w.removed_value_count(), 1);
    }

    #[test]
    fn removed_buffer_resets_on_later_tick() {
        let mut w = WindowStorage::new(WindowSpec::Ticks(1));
        w.push(ScalarValue::Int(1), t(0));
        w.push(ScalarValue::Int(2), t(1));
        assert_eq!(w.removed_value_count(), 1);
        w.push(ScalarValue::Int(3), t(2));
        // Only the eviction from the newest tick remains.
        assert_eq!(w.removed_value(), Some(&ScalarValue::Int(2)));
        assert_eq!(w.removed_value_count(), 1);
    }
}
