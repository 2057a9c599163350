// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Injection queue.
//!
//! Every runnable task lands here: fresh spawns, woken tasks and tasks
//! whose waker fired mid-poll. FIFO, so wake order is poll order.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::task::RawTask;

pub(crate) struct InjectorQueue {
    queue: Mutex<VecDeque<Arc<RawTask>>>,
}

impl InjectorQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, task: Arc<RawTask>) {
        self.queue.lock().push_back(task);
    }

    pub fn pop(&self) -> Option<Arc<RawTask>> {
        self.queue.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Remove everything (used on shutdown).
    pub fn drain_all(&self) -> Vec<Arc<RawTask>> {
        self.queue.lock().drain(..).collect()
    }
}
