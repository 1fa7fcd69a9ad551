//! Rendezvous barrier over a dynamically sized set of sensor workers.
//!
//! All registered workers must arrive at `wait` before any of them proceeds
//! to the next segment window. Unlike `std::sync::Barrier`, membership is
//! dynamic: workers that exhaust their input deregister, and every mutating
//! operation re-evaluates the release condition under the same lock so a
//! deregistration can never strand the remaining waiters.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};

#[derive(Debug, Default)]
struct BarrierState {
    active: HashSet<String>,
    waiting: usize,
    // Bumped on every broadcast; waiters block until it changes, which
    // makes the release an all-or-nothing generation switch.
    generation: u64,
}

#[derive(Debug, Default)]
pub struct SegmentBarrier {
    state: Mutex<BarrierState>,
    cond: Condvar,
}

impl SegmentBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worker to the active set. Must be called before the worker's
    /// first `wait`.
    pub fn register(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.active.insert(id.to_string());
        tracing::debug!(worker = id, active = state.active.len(), "barrier register");
    }

    /// Remove a worker from the active set. If everyone still active is
    /// already waiting, release them; the departed worker will never arrive.
    pub fn deregister(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.active.remove(id);
        tracing::debug!(worker = id, active = state.active.len(), "barrier deregister");
        if state.waiting > 0 && state.waiting >= state.active.len() {
            state.waiting = 0;
            state.generation = state.generation.wrapping_add(1);
            self.cond.notify_all();
        }
    }

    /// Arrive at the barrier. The last active worker to arrive releases all
    /// waiters atomically.
    pub fn wait(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.waiting += 1;
        if state.waiting >= state.active.len() {
            state.waiting = 0;
            state.generation = state.generation.wrapping_add(1);
            self.cond.notify_all();
            return;
        }
        tracing::trace!(worker = id, waiting = state.waiting, "barrier wait");
        let generation = state.generation;
        while state.generation == generation {
            state = self.cond.wait(state).unwrap();
        }
    }

    #[cfg(test)]
    fn waiting_count(&self) -> usize {
        self.state.lock().unwrap().waiting
    }
}
