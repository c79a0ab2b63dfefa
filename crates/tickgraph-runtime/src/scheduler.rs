//! Per-node tag-keyed scheduler of future wake times.
//!
//! An ordered set of `(time, tag)` pairs plus a tag index. Tagged entries
//! have replace semantics: scheduling an existing tag moves its time.
//! Untagged entries coexist at distinct times.

use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

use tickgraph_common::{
    EngineTime, EngineTimeDelta, GraphError, GraphErrorExtra, GraphErrorKind, MAX_DT,
};

/// Internal tag: empty string marks an untagged entry.
type Tag = String;

#[derive(Debug, Default)]
pub struct NodeScheduler {
    events: BTreeSet<(EngineTime, Tag)>,
    tags: FxHashMap<Tag, EngineTime>,
    /// Tags scheduled against the wall clock (real-time alarms).
    alarm_tags: FxHashMap<Tag, EngineTime>,
    last_scheduled: EngineTime,
}

impl NodeScheduler {
    pub fn new() -> Self {
        Self {
            last_scheduled: tickgraph_common::MIN_DT,
            ..Default::default()
        }
    }

    /// Schedule a wake at an absolute time. A tagged entry replaces any
    /// previous entry with the same tag; untagged entries accumulate.
    pub fn schedule(&mut self, when: EngineTime, tag: Option<&str>) {
        match tag {
            Some(tag) => {
                if let Some(old) = self.tags.insert(tag.to_string(), when) {
                    self.events.remove(&(old, tag.to_string()));
                }
                self.events.insert((when, tag.to_string()));
            }
            None => {
                self.events.insert((when, Tag::new()));
            }
        }
        self.last_scheduled = when;
    }

    /// Schedule relative to a base time (the evaluation time, or `now()` for
    /// wall-clock alarms in real-time mode).
    pub fn schedule_in(
        &mut self,
        delta: EngineTimeDelta,
        tag: Option<&str>,
        base: EngineTime,
        on_wall_clock: bool,
    ) {
        let when = base + delta;
        self.schedule(when, tag);
        if on_wall_clock {
            if let Some(tag) = tag {
                self.alarm_tags.insert(tag.to_string(), when);
            }
        }
    }

    pub fn un_schedule(&mut self, tag: &str) {
        if let Some(old) = self.tags.remove(tag) {
            self.events.remove(&(old, tag.to_string()));
        }
        self.alarm_tags.remove(tag);
    }

    /// Remove a tag and return its time.
    pub fn pop_tag(&mut self, tag: &str) -> Result<EngineTime, GraphError> {
        match self.tags.remove(tag) {
            Some(when) => {
                self.events.remove(&(when, tag.to_string()));
                self.alarm_tags.remove(tag);
                Ok(when)
            }
            None => Err(GraphError::new(GraphErrorKind::NotFound)
                .with_message("no such scheduler tag")
                .with_extra(GraphErrorExtra::Tag { tag: tag.to_string() })),
        }
    }

    /// Remove a tag, falling back to a default time when absent.
    pub fn pop_tag_or(&mut self, tag: &str, default: EngineTime) -> EngineTime {
        self.pop_tag(tag).unwrap_or(default)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains_key(tag)
    }

    pub fn is_alarm_tag(&self, tag: &str) -> bool {
        self.alarm_tags.contains_key(tag)
    }

    /// Whether any entry exists at all.
    pub fn requires_scheduling(&self) -> bool {
        !self.events.is_empty()
    }

    /// Whether any entry matches the given evaluation time.
    pub fn is_scheduled_now(&self, evaluation_time: EngineTime) -> bool {
        self.events
            .range((evaluation_time, Tag::new())..)
            .next()
            .map(|(t, _)| *t == evaluation_time)
            .unwrap_or(false)
    }

    /// The earliest entry at or before `evaluation_time`, if any.
    pub fn due_time(&self, evaluation_time: EngineTime) -> Option<EngineTime> {
        self.events
            .iter()
            .next()
            .map(|(t, _)| *t)
            .filter(|t| *t <= evaluation_time)
    }

    /// The minimum entry strictly after `evaluation_time`, `MAX_DT` if none.
    pub fn next_scheduled_time(&self, evaluation_time: EngineTime) -> EngineTime {
        self.events
            .iter()
            .map(|(t, _)| *t)
            .find(|t| *t > evaluation_time)
            .unwrap_or(MAX_DT)
    }

    /// The earliest entry regardless of the evaluation time.
    pub fn first_scheduled_time(&self) -> EngineTime {
        self.events.iter().next().map(|(t, _)| *t).unwrap_or(MAX_DT)
    }

    /// Drop entries at or before the evaluation time; runs after the cycle.
    pub fn advance(&mut self, evaluation_time: EngineTime) {
        while let Some((t, tag)) = self.events.iter().next().cloned() {
            if t > evaluation_time {
                break;
            }
            self.events.remove(&(t, tag.clone()));
            if !tag.is_empty() {
                // Only clear the index if it still points at this entry.
                if self.tags.get(&tag) == Some(&t) {
                    self.tags.remove(&tag);
                    self.alarm_tags.remove(&tag);
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.events.clear();
        self.tags.clear();
        self.alarm_tags.clear();
        self.last_scheduled = tickgraph_common::MIN_DT;
    }

    pub fn last_scheduled_time(&self) -> EngineTime {
        self.last_scheduled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(us: i64) -> EngineTime {
        EngineTime::from_micros(us)
    }

    #[test]
    fn tagged_schedule_replaces() {
        let mut s = NodeScheduler::new();
        s.schedule(t(100), Some("retry"));
        s.schedule(t(200), Some("retry"));
        assert_eq!(s.next_scheduled_time(t(0)), t(200));
        assert!(s.has_tag("retry"));
        assert_eq!(s.pop_tag("retry").unwrap(), t(200));
        assert!(!s.has_tag("retry"));
        assert!(!s.requires_scheduling());
    }

    #[test]
    fn pop_missing_tag_is_not_found() {
        let mut s = NodeScheduler::new();
        let err = s.pop_tag("ghost").unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::NotFound);
        assert_eq!(s.pop_tag_or("ghost", t(7)), t(7));
    }

    #[test]
    fn untagged_entries_accumulate() {
        let mut s = NodeScheduler::new();
        s.schedule(t(10), None);
        s.schedule(t(20), None);
        assert_eq!(s.first_scheduled_time(), t(10));
        s.advance(t(10));
        assert_eq!(s.first_scheduled_time(), t(20));
    }

    #[test]
    fn is_scheduled_now_matches_exact_time() {
        let mut s = NodeScheduler::new();
        s.schedule(t(100), Some("a"));
        assert!(s.is_scheduled_now(t(100)));
        assert!(!s.is_scheduled_now(t(99)));
        assert!(!s.is_scheduled_now(t(101)));
    }

    #[test]
    fn next_scheduled_time_is_strictly_after() {
        let mut s = NodeScheduler::new();
        s.schedule(t(100), Some("a"));
        s.schedule(t(150), Some("b"));
        assert_eq!(s.next_scheduled_time(t(100)), t(150));
        assert_eq!(s.next_scheduled_time(t(150)), MAX_DT);
    }

    #[test]
    fn advance_prunes_past_entries() {
        let mut s = NodeScheduler::new();
        s.schedule(t(10), Some("a"));
        s.schedule(t(20), Some("b"));
        s.advance(t(10));
        assert!(!s.has_tag("a"));
        assert!(s.has_tag("b"));
    }

    #[test]
    fn wall_clock_alarm_tags_are_tracked() {
        let mut s = NodeScheduler::new();
        s.schedule_in(EngineTimeDelta::from_micros(50), Some("alarm"), t(1000), true);
        assert!(s.is_alarm_tag("alarm"));
        assert_eq!(s.pop_tag("alarm").unwrap(), t(1050));
        assert!(!s.is_alarm_tag("alarm"));
    }
}
