// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Single-threaded cooperative executor.
//!
//! Components:
//! - `task`  — raw task record, state machine, waker
//! - `queue` — injection queue every runnable task goes through
//! - `timer` — real/virtual clock and the timer heap behind `delay`
//!
//! One thread drives the loop: drain remote jobs, poll ready tasks, fire
//! due timers. When nothing is ready it either advances the clock to the
//! next deadline, waits for a remote handle's event, or reports a stall.

mod queue;
mod task;
mod timer;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::config::ClockMode;
use crate::error::RuntimeError;

use queue::InjectorQueue;
use task::RawTask;
use timer::{Clock, TimerHeap};

type Job = Box<dyn FnOnce() + Send>;

pub(crate) struct Shared {
    queue: InjectorQueue,
    timers: Mutex<TimerHeap>,
    clock: Clock,
    jobs: Mutex<Vec<Job>>,
    /// Live `RemoteHandle`s. While non-zero an idle executor waits instead of stalling.
    remotes: AtomicUsize,
    /// Spawned futures that have not completed.
    live: AtomicUsize,
    /// Every unfinished task, including parked ones only reachable through wakers.
    tasks: Mutex<HashMap<u64, Weak<RawTask>>>,
    next_task: AtomicU64,
    /// Notify the executor thread that work (or a remote event) arrived.
    work_available: (Mutex<bool>, Condvar),
    stall_timeout: Duration,
}

impl Shared {
    pub(crate) fn inject(&self, task: Arc<RawTask>) {
        self.queue.push(task);
        self.notify();
    }

    fn register(
        self: &Arc<Self>,
        future: impl Future<Output = ()> + Send + 'static,
    ) -> Arc<RawTask> {
        self.live.fetch_add(1, Ordering::AcqRel);
        let id = self.next_task.fetch_add(1, Ordering::Relaxed);
        let raw = RawTask::new(id, Box::pin(future), self);
        self.tasks.lock().insert(id, Arc::downgrade(&raw));
        raw
    }

    fn notify(&self) {
        let (lock, cvar) = &self.work_available;
        *lock.lock() = true;
        cvar.notify_one();
    }

    /// Sleep until notified or `timeout` elapses.
    fn wait(&self, timeout: Duration) {
        let (lock, cvar) = &self.work_available;
        let mut ready = lock.lock();
        if !*ready && self.queue.is_empty() && self.jobs.lock().is_empty() {
            cvar.wait_for(&mut ready, timeout);
        }
        *ready = false;
    }
}

#[derive(Clone)]
pub struct Executor {
    shared: Arc<Shared>,
}

impl Executor {
    pub fn new(clock: ClockMode, stall_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: InjectorQueue::new(),
                timers: Mutex::new(TimerHeap::default()),
                clock: Clock::new(clock),
                jobs: Mutex::new(Vec::new()),
                remotes: AtomicUsize::new(0),
                live: AtomicUsize::new(0),
                tasks: Mutex::new(HashMap::new()),
                next_task: AtomicU64::new(0),
                work_available: (Mutex::new(false), Condvar::new()),
                stall_timeout,
            }),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.shared.clock.now_ms()
    }

    /// Queue a future. It is first polled on the next tick.
    pub fn spawn(&self, future: impl Future<Output = ()> + Send + 'static) {
        let raw = self.shared.register(future);
        self.shared.inject(raw);
    }

    /// Poll a future right away, up to its first suspension. Must be called
    /// on the executor thread.
    pub fn spawn_now(&self, future: impl Future<Output = ()> + Send + 'static) {
        let raw = self.shared.register(future);
        self.run_task(raw);
    }

    /// Run `callback` on the executor thread once `delay_ms` have elapsed.
    pub fn schedule(&self, delay_ms: u64, callback: impl FnOnce() + Send + 'static) {
        let deadline = self.shared.clock.now_ms().saturating_add(delay_ms);
        self.shared.timers.lock().push(deadline, Box::new(callback));
        self.shared.notify();
    }

    pub fn remote(&self) -> RemoteHandle {
        self.shared.remotes.fetch_add(1, Ordering::AcqRel);
        RemoteHandle {
            shared: self.shared.clone(),
        }
    }

    /// Spawned futures that have not finished yet.
    pub fn pending(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Drive until `done` holds.
    pub fn run_until(&self, mut done: impl FnMut() -> bool) -> Result<(), RuntimeError> {
        loop {
            let progressed = self.tick();
            if done() {
                return Ok(());
            }
            if progressed {
                continue;
            }
            if self.idle_step(true) {
                continue;
            }
            let pending = self.pending();
            tracing::debug!(pending, "executor stalled");
            return Err(RuntimeError::Stalled { pending });
        }
    }

    /// Drive until nothing is ready and no timer is pending.
    pub fn run_until_idle(&self) {
        loop {
            if self.tick() {
                continue;
            }
            if !self.idle_step(false) {
                return;
            }
        }
    }

    /// One pass: remote jobs, every ready task, every due timer.
    fn tick(&self) -> bool {
        let mut progressed = false;

        let jobs = std::mem::take(&mut *self.shared.jobs.lock());
        for job in jobs {
            job();
            progressed = true;
        }

        while let Some(raw) = self.shared.queue.pop() {
            progressed = true;
            self.run_task(raw);
        }

        let now = self.shared.clock.now_ms();
        let due = self.shared.timers.lock().pop_due(now);
        for callback in due {
            callback();
            progressed = true;
        }
        progressed
    }

    fn run_task(&self, raw: Arc<RawTask>) {
        if !raw.begin_poll() {
            return;
        }
        if raw.poll() {
            raw.mark_complete();
            self.shared.tasks.lock().remove(&raw.id());
            self.shared.live.fetch_sub(1, Ordering::AcqRel);
        } else if !raw.park() {
            // Woken while being polled.
            self.shared.queue.push(raw);
        }
    }

    /// Nothing is ready. Returns false if there is nothing left to wait for.
    fn idle_step(&self, wait_for_remotes: bool) -> bool {
        // Work may have arrived from another thread since the last tick.
        if !self.shared.queue.is_empty() || !self.shared.jobs.lock().is_empty() {
            return true;
        }
        let next = self.shared.timers.lock().next_deadline();
        if let Some(deadline) = next {
            match self.shared.clock.mode() {
                ClockMode::Virtual => self.shared.clock.advance_to(deadline),
                ClockMode::Real => {
                    let now = self.shared.clock.now_ms();
                    if deadline > now {
                        self.shared.wait(Duration::from_millis(deadline - now));
                    }
                }
            }
            return true;
        }
        if wait_for_remotes && self.shared.remotes.load(Ordering::Acquire) > 0 {
            self.shared.wait(self.shared.stall_timeout);
            return true;
        }
        false
    }

    /// Drop every unfinished future, timer and job.
    pub fn shutdown(&self) {
        let tasks: Vec<Arc<RawTask>> = self
            .shared
            .tasks
            .lock()
            .drain()
            .filter_map(|(_, task)| task.upgrade())
            .collect();
        if !tasks.is_empty() {
            tracing::debug!(tasks = tasks.len(), "abandoning unfinished tasks");
        }
        for raw in tasks {
            raw.abandon();
        }
        for raw in self.shared.queue.drain_all() {
            raw.abandon();
        }
        self.shared.timers.lock().clear();
        self.shared.jobs.lock().clear();
    }
}

/// Keeps the executor waiting for external events instead of stalling, and
/// runs closures on the executor thread.
pub struct RemoteHandle {
    shared: Arc<Shared>,
}

impl RemoteHandle {
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        self.shared.jobs.lock().push(Box::new(job));
        self.shared.notify();
    }
}

impl Clone for RemoteHandle {
    fn clone(&self) -> Self {
        self.shared.remotes.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for RemoteHandle {
    fn drop(&mut self) {
        self.shared.remotes.fetch_sub(1, Ordering::AcqRel);
        self.shared.notify();
    }
}
