// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Executor-side task record.
//!
//! One `RawTask` per driven future. The future is polled only by the
//! executor thread; wakers may fire from anywhere and re-enqueue the task
//! through the shared injection queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;

use super::Shared;

/// Scheduling states.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawState {
    /// Queued, waiting to be polled.
    Ready = 0,
    /// Being polled right now.
    Running = 1,
    /// Parked until its waker fires.
    Waiting = 2,
    Complete = 3,
}

impl RawState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Ready,
            1 => Self::Running,
            2 => Self::Waiting,
            _ => Self::Complete,
        }
    }
}

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

pub(crate) struct RawTask {
    id: u64,
    state: AtomicU8,
    future: Mutex<Option<BoxFuture>>,
    shared: Weak<Shared>,
}

impl std::fmt::Debug for RawTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawTask")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl RawTask {
    pub fn new(id: u64, future: BoxFuture, shared: &Arc<Shared>) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: AtomicU8::new(RawState::Ready as u8),
            future: Mutex::new(Some(future)),
            shared: Arc::downgrade(shared),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> RawState {
        RawState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Mark as being polled. Returns false if already complete.
    pub fn begin_poll(&self) -> bool {
        if self.state() == RawState::Complete {
            return false;
        }
        self.state.store(RawState::Running as u8, Ordering::Release);
        true
    }

    /// Poll the future once. Returns true if it finished.
    pub fn poll(self: &Arc<Self>) -> bool {
        let waker = Waker::from(Arc::new(TaskWaker { task: self.clone() }));
        let mut cx = Context::from_waker(&waker);

        let mut slot = self.future.lock();
        let Some(fut) = slot.as_mut() else {
            return true;
        };
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                *slot = None;
                true
            }
            Poll::Pending => false,
        }
    }

    pub fn mark_complete(&self) {
        self.state.store(RawState::Complete as u8, Ordering::Release);
    }

    /// Running -> Waiting after a `Pending` poll. Fails if the waker fired
    /// during the poll, in which case the caller must re-enqueue.
    pub fn park(&self) -> bool {
        self.state
            .compare_exchange(
                RawState::Running as u8,
                RawState::Waiting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Drop the future without completing it (executor shutdown).
    pub fn abandon(&self) {
        self.mark_complete();
        let fut = self.future.lock().take();
        drop(fut);
    }
}

struct TaskWaker {
    task: Arc<RawTask>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        let state = &self.task.state;
        // Waiting: move to Ready and enqueue.
        if state
            .compare_exchange(
                RawState::Waiting as u8,
                RawState::Ready as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            if let Some(shared) = self.task.shared.upgrade() {
                shared.inject(self.task.clone());
            }
            return;
        }
        // Running: flag it so `park` fails and the poller re-enqueues.
        let _ = state.compare_exchange(
            RawState::Running as u8,
            RawState::Ready as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}
