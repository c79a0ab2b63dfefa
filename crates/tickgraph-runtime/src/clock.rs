//! Engine clocks.
//!
//! The read-only [`EvaluationClock`] face is what node code sees; the engine
//! owns the mutable side: setting the evaluation time, tracking the next
//! scheduled time and the "a push node needs scheduling" flag that lets
//! producer threads preempt a real-time wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tickgraph_common::{EngineTime, EngineTimeDelta, MAX_DT};

/// How the engine drives time forward.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EvaluationMode {
    /// The engine clock is the driver; `now()` equals the evaluation time
    /// and the loop advances as fast as work is available.
    Simulation,
    /// `now()` is the wall clock; the loop sleeps until the next scheduled
    /// time, preempted by push arrivals.
    RealTime,
    /// Real-time shaped; a persistence collaborator records alongside.
    Recording,
    /// Real-time shaped; a persistence collaborator feeds replayed events.
    Replay,
}

impl EvaluationMode {
    /// Whether `now()` tracks the wall clock.
    pub fn is_wall_clock(self) -> bool {
        !matches!(self, EvaluationMode::Simulation)
    }
}

/// Read-only clock surface handed to node code.
pub trait EvaluationClock {
    /// The engine time of the current cycle.
    fn evaluation_time(&self) -> EngineTime;

    /// Wall-clock now in real-time modes; the evaluation time in simulation.
    fn now(&self) -> EngineTime;

    /// The time the next cycle will run at, `MAX_DT` if none is pending.
    fn next_cycle_evaluation_time(&self) -> EngineTime;

    /// Wall time spent in the current cycle so far.
    fn cycle_time(&self) -> EngineTimeDelta;
}

pub(crate) fn wall_now() -> EngineTime {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0);
    EngineTime::from_micros(micros)
}

/// The engine-owned clock.
#[derive(Debug)]
pub struct EngineClock {
    mode: EvaluationMode,
    evaluation_time: EngineTime,
    next_scheduled: EngineTime,
    cycle_wall_start: EngineTime,
    push_pending: Arc<AtomicBool>,
}

impl EngineClock {
    pub fn new(mode: EvaluationMode, start: EngineTime, push_pending: Arc<AtomicBool>) -> Self {
        Self {
            mode,
            evaluation_time: start,
            next_scheduled: MAX_DT,
            cycle_wall_start: if mode.is_wall_clock() { wall_now() } else { start },
            push_pending,
        }
    }

    #[inline]
    pub fn mode(&self) -> EvaluationMode {
        self.mode
    }

    pub fn set_evaluation_time(&mut self, t: EngineTime) {
        self.evaluation_time = t;
        self.cycle_wall_start = if self.mode.is_wall_clock() { wall_now() } else { t };
    }

    pub fn next_scheduled_evaluation_time(&self) -> EngineTime {
        self.next_scheduled
    }

    /// Pull the next scheduled time closer; never pushes it out.
    pub fn update_next_scheduled_evaluation_time(&mut self, t: EngineTime) {
        if t < self.next_scheduled {
            self.next_scheduled = t;
        }
    }

    pub fn reset_next_scheduled_evaluation_time(&mut self) {
        self.next_scheduled = MAX_DT;
    }

    /// Jump the evaluation time to the pending scheduled time.
    pub fn advance_to_next_scheduled_time(&mut self) {
        let next = self.next_scheduled;
        self.set_evaluation_time(next);
        self.next_scheduled = MAX_DT;
    }

    pub fn mark_push_node_requires_scheduling(&self) {
        self.push_pending.store(true, Ordering::Release);
    }

    pub fn push_node_requires_scheduling(&self) -> bool {
        self.push_pending.load(Ordering::Acquire)
    }

    pub fn reset_push_node_requires_scheduling(&self) {
        self.push_pending.store(false, Ordering::Release);
    }
}

impl EvaluationClock for EngineClock {
    fn evaluation_time(&self) -> EngineTime {
        self.evaluation_time
    }

    fn now(&self) -> EngineTime {
        if self.mode.is_wall_clock() {
            wall_now()
        } else {
            self.evaluation_time
        }
    }

    fn next_cycle_evaluation_time(&self) -> EngineTime {
        self.next_scheduled
    }

    fn cycle_time(&self) -> EngineTimeDelta {
        self.now() - self.cycle_wall_start
    }
}
