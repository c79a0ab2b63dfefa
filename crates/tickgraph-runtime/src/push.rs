//! The push inbox: the one thread boundary in the runtime.
//!
//! Producer threads enqueue values for push source nodes; the engine drains
//! the inbox only at cycle boundaries, so arrivals become visible in total
//! reception order at the next cycle's evaluation time. A condition variable
//! lets a real-time engine sleep until either the next scheduled time or an
//! arrival, whichever comes first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tickgraph_common::{EngineTime, GraphError, GraphErrorKind};
use tickgraph_types::Value;

use crate::clock::wall_now;

/// One queued arrival for a push source node.
#[derive(Debug)]
pub struct PushEvent {
    pub node: u32,
    pub value: Value,
}

#[derive(Debug, Default)]
struct Inner {
    queue: Mutex<VecDeque<PushEvent>>,
    arrived: Condvar,
    /// Shared with the engine clock as "push node requires scheduling".
    pending: Arc<AtomicBool>,
}

/// Engine-side handle.
#[derive(Debug, Clone, Default)]
pub struct PushInbox {
    inner: Arc<Inner>,
}

impl PushInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// The flag the engine clock reads as "push node requires scheduling".
    pub fn pending_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.inner.pending)
    }

    pub fn has_pending(&self) -> bool {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Create a producer handle for one push source node.
    pub fn sender(&self, node: u32) -> PushSender {
        PushSender {
            inner: Arc::clone(&self.inner),
            node,
        }
    }

    /// Take everything queued, in reception order.
    pub fn drain(&self) -> Vec<PushEvent> {
        let mut q = self.inner.queue.lock().expect("push inbox poisoned");
        let drained: Vec<PushEvent> = q.drain(..).collect();
        self.inner.pending.store(false, Ordering::Release);
        drained
    }

    /// Block until the wall clock reaches `deadline` or an arrival lands.
    /// Returns true if an arrival preempted the wait.
    pub fn wait_until(&self, deadline: EngineTime) -> bool {
        let mut q = self.inner.queue.lock().expect("push inbox poisoned");
        loop {
            if !q.is_empty() {
                return true;
            }
            let now = wall_now();
            if now >= deadline {
                return false;
            }
            let remaining = (deadline - now).micros().max(0) as u64;
            let (guard, timeout) = self
                .inner
                .arrived
                .wait_timeout(q, Duration::from_micros(remaining))
                .expect("push inbox poisoned");
            q = guard;
            if timeout.timed_out() && q.is_empty() {
                return false;
            }
        }
    }
}

/// Cloneable producer handle usable from any thread.
#[derive(Debug, Clone)]
pub struct PushSender {
    inner: Arc<Inner>,
    node: u32,
}

impl PushSender {
    pub fn node(&self) -> u32 {
        self.node
    }

    pub fn send(&self, value: Value) -> Result<(), GraphError> {
        let mut q = self
            .inner
            .queue
            .lock()
            .map_err(|_| GraphError::new(GraphErrorKind::Stopped))?;
        q.push_back(PushEvent { node: self.node, value });
        self.inner.pending.store(true, Ordering::Release);
        self.inner.arrived.notify_one();
        Ok(())
    }
}
