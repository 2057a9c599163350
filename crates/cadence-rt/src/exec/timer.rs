// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Clock and timer heap.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::config::ClockMode;

/// Milliseconds since the executor was created.
pub(crate) struct Clock {
    mode: ClockMode,
    start: Instant,
    virtual_ms: AtomicU64,
}

impl Clock {
    pub fn new(mode: ClockMode) -> Self {
        Self {
            mode,
            start: Instant::now(),
            virtual_ms: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> ClockMode {
        self.mode
    }

    pub fn now_ms(&self) -> u64 {
        match self.mode {
            ClockMode::Real => self.start.elapsed().as_millis() as u64,
            ClockMode::Virtual => self.virtual_ms.load(Ordering::Acquire),
        }
    }

    /// Jump a virtual clock forward. Never moves backwards.
    pub fn advance_to(&self, ms: u64) {
        self.virtual_ms.fetch_max(ms, Ordering::AcqRel);
    }
}

pub(crate) type TimerCallback = Box<dyn FnOnce() + Send>;

struct Timer {
    deadline: u64,
    seq: u64,
    callback: TimerCallback,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

// Reversed: BinaryHeap is a max-heap, the earliest deadline must be on top.
// Equal deadlines fire in scheduling order.
impl Ord for Timer {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<Timer>,
    seq: u64,
}

impl TimerHeap {
    pub fn push(&mut self, deadline: u64, callback: TimerCallback) {
        self.seq += 1;
        self.heap.push(Timer {
            deadline,
            seq: self.seq,
            callback,
        });
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.heap.peek().map(|t| t.deadline)
    }

    /// Remove every timer due at or before `now`, in firing order.
    pub fn pop_due(&mut self, now: u64) -> Vec<TimerCallback> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|t| t.deadline <= now) {
            if let Some(timer) = self.heap.pop() {
                due.push(timer.callback);
            }
        }
        due
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
