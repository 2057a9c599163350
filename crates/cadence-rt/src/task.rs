// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task records and their lifecycle.
//!
//! ```text
//! RUNNING ──body returns──▶ COMPLETED ──forks empty──▶ TERMINATED
//!    │                                                     ▲
//!    ├──cancel()──▶ cancelled + completed ─────────────────┤
//!    └──uncaught error──▶ error set, forks cancelled ──────┘
//! ```
//!
//! Termination requires the body to have finished (including cleanup after
//! a cancellation) and every attached fork to have detached.
//!
//! Every cancellation or terminal error bumps the task's epoch. Effects
//! capture the epoch when they start, and results carrying an older epoch
//! are dropped, so a task is never resumed by a stale callback.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as PollContext, Poll, Waker};

use indexmap::IndexMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::channel::BufferedChannel;
use crate::context::Context;
use crate::effect::{Descriptor, EffectId, Resume, WeakResume};
use crate::engine::Engine;
use crate::error::Error;
use crate::monitor::{MonitorEvent, TaskInfo};
use crate::value::Value;

pub type TaskId = Uuid;

/// How a task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(Value),
    /// Not an error: a distinct terminal state.
    Cancelled,
    Failed(Error),
}

impl Outcome {
    /// `Cancelled` maps to `Err(Error::Cancelled)`.
    pub fn into_result(self) -> Result<Value, Error> {
        match self {
            Outcome::Completed(v) => Ok(v),
            Outcome::Cancelled => Err(Error::Cancelled),
            Outcome::Failed(e) => Err(e),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Outcome::Completed(v) => Some(v),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Outcome::Completed(_) => "completed",
            Outcome::Cancelled => "cancelled",
            Outcome::Failed(_) => "failed",
        }
    }
}

type CompletionFn = Box<dyn FnOnce(Outcome) + Send>;

struct AttachedEffect {
    effect: Descriptor,
    resume: WeakResume,
}

/// Result cell of one pending yield point.
///
/// Filled at most once: by the effect's resume, or by cancellation.
pub(crate) struct Slot {
    state: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    filled: bool,
    result: Option<Result<Value, Error>>,
    waker: Option<Waker>,
}

impl Slot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState::default()),
        })
    }

    /// Returns false if the slot was already filled.
    pub fn fill(&self, result: Result<Value, Error>) -> bool {
        let waker = {
            let mut state = self.state.lock();
            if state.filled {
                return false;
            }
            state.filled = true;
            state.result = Some(result);
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    pub fn poll(&self, waker: &Waker) -> Poll<Result<Value, Error>> {
        let mut state = self.state.lock();
        match state.result.take() {
            Some(result) => Poll::Ready(result),
            None => {
                state.waker = Some(waker.clone());
                Poll::Pending
            }
        }
    }
}

struct State {
    running: bool,
    cancelled: bool,
    completed: bool,
    terminated: bool,
    body_done: bool,
    /// Cancelled while no yield point was pending: the next one throws.
    cancel_pending: bool,
    epoch: u64,
    result: Option<Value>,
    error: Option<Error>,
    outcome: Option<Outcome>,
    forks: IndexMap<TaskId, Task>,
    effects: IndexMap<EffectId, AttachedEffect>,
    interrupt: Option<Arc<Slot>>,
    waiters: Vec<CompletionFn>,
    done_wakers: Vec<Waker>,
}

struct Inner {
    id: TaskId,
    name: String,
    context: Context,
    mailbox: BufferedChannel,
    engine: Engine,
    state: Mutex<State>,
}

/// Handle to one running or finished process.
#[derive(Clone)]
pub struct Task {
    inner: Arc<Inner>,
}

impl Task {
    pub(crate) fn new(name: &str, context: Context, engine: Engine) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                name: name.to_string(),
                context,
                mailbox: BufferedChannel::unbounded(),
                engine,
                state: Mutex::new(State {
                    running: true,
                    cancelled: false,
                    completed: false,
                    terminated: false,
                    body_done: false,
                    cancel_pending: false,
                    epoch: 0,
                    result: None,
                    error: None,
                    outcome: None,
                    forks: IndexMap::new(),
                    effects: IndexMap::new(),
                    interrupt: None,
                    waiters: Vec::new(),
                    done_wakers: Vec::new(),
                }),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    /// Actor mailbox, fed by `send` and drained by `receive`.
    pub fn mailbox(&self) -> &BufferedChannel {
        &self.inner.mailbox
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.lock().cancelled
    }

    pub fn is_completed(&self) -> bool {
        self.inner.state.lock().completed
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.state.lock().terminated
    }

    pub fn result(&self) -> Option<Value> {
        self.inner.state.lock().result.clone()
    }

    pub fn error(&self) -> Option<Error> {
        self.inner.state.lock().error.clone()
    }

    /// Set once the task terminates.
    pub fn outcome(&self) -> Option<Outcome> {
        self.inner.state.lock().outcome.clone()
    }

    pub fn attached_forks(&self) -> Vec<Task> {
        self.inner.state.lock().forks.values().cloned().collect()
    }

    /// Effects currently being resolved on behalf of this task.
    pub fn attached_effects(&self) -> Vec<Descriptor> {
        self.inner
            .state
            .lock()
            .effects
            .values()
            .map(|attached| attached.effect.clone())
            .collect()
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.inner.id.to_string(),
            name: self.inner.name.clone(),
        }
    }

    /// Register a one-shot completion callback. Runs immediately if the
    /// task has already terminated.
    pub fn on_complete(&self, callback: impl FnOnce(Outcome) + Send + 'static) {
        let outcome = {
            let mut state = self.inner.state.lock();
            match &state.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    state.waiters.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(outcome);
    }

    /// Future resolving with the outcome once the task terminates.
    pub fn done(&self) -> Done {
        Done { task: self.clone() }
    }

    /// Cancel this task and, recursively, every attached fork.
    ///
    /// A pending yield point resumes with `Err(Error::Cancelled)`. The body
    /// may still run cleanup effects, which resolve normally. No-op on a
    /// task that already terminated, failed or was cancelled.
    pub fn cancel(&self) {
        let (slot, forks) = {
            let mut state = self.inner.state.lock();
            if state.cancelled || state.terminated || state.error.is_some() {
                return;
            }
            state.cancelled = true;
            state.completed = true;
            state.running = false;
            state.epoch += 1;
            let forks: Vec<Task> = state.forks.values().cloned().collect();
            (state.interrupt.take(), forks)
        };
        tracing::debug!(task = %self.inner.name, id = %self.inner.id, "task cancelled");
        self.emit(|task, timestamp| MonitorEvent::TaskCancelled { task, timestamp });

        let injected = slot.is_some_and(|slot| slot.fill(Err(Error::Cancelled)));
        if !injected {
            let mut state = self.inner.state.lock();
            if !state.body_done {
                state.cancel_pending = true;
            }
        }

        for fork in forks {
            fork.cancel();
        }
        self.try_terminate();
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.inner.state.lock().epoch
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// Register the slot of the yield point the body is suspended on.
    pub(crate) fn set_interrupt(&self, slot: Arc<Slot>) {
        self.inner.state.lock().interrupt = Some(slot);
    }

    pub(crate) fn clear_interrupt(&self, slot: &Arc<Slot>) {
        let mut state = self.inner.state.lock();
        if state
            .interrupt
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            state.interrupt = None;
        }
    }

    /// Consume a cancellation that arrived between yield points.
    pub(crate) fn take_cancel_pending(&self) -> bool {
        std::mem::take(&mut self.inner.state.lock().cancel_pending)
    }

    pub(crate) fn attach_effect(&self, effect: &Descriptor, resume: &Resume) {
        self.inner.state.lock().effects.insert(
            effect.id(),
            AttachedEffect {
                effect: effect.clone(),
                resume: resume.downgrade(),
            },
        );
    }

    pub(crate) fn detach_effect(&self, id: EffectId) -> bool {
        self.inner.state.lock().effects.shift_remove(&id).is_some()
    }

    pub(crate) fn attach_fork(&self, child: &Task) {
        self.inner
            .state
            .lock()
            .forks
            .insert(child.id(), child.clone());
        let child_info = child.info();
        self.emit(|parent, timestamp| MonitorEvent::TaskAttached {
            parent,
            task: child_info,
            timestamp,
        });
    }

    pub(crate) fn detach_fork(&self, child: &Task) {
        let removed = self
            .inner
            .state
            .lock()
            .forks
            .shift_remove(&child.id())
            .is_some();
        if removed {
            let child_info = child.info();
            self.emit(|parent, timestamp| MonitorEvent::TaskDetached {
                parent,
                task: child_info,
                timestamp,
            });
            self.try_terminate();
        }
    }

    /// Record how the body ended and attempt termination.
    pub(crate) fn finish_body(&self, result: Result<Value, Error>) {
        let (forks, error, value) = {
            let mut state = self.inner.state.lock();
            state.body_done = true;
            state.interrupt = None;
            state.cancel_pending = false;
            match result {
                Ok(value) => {
                    if !state.cancelled {
                        state.result = Some(value.clone());
                        state.completed = true;
                    }
                    (Vec::new(), None, value)
                }
                Err(e) if state.cancelled => {
                    if !e.is_cancelled() {
                        tracing::warn!(
                            task = %self.inner.name,
                            error = %e,
                            "error raised while cleaning up a cancelled task"
                        );
                    }
                    (Vec::new(), None, Value::Unit)
                }
                Err(e) => {
                    state.error = Some(e.clone());
                    state.completed = true;
                    state.running = false;
                    state.epoch += 1;
                    let forks = state.forks.values().cloned().collect();
                    (forks, Some(e), Value::Unit)
                }
            }
        };

        tracing::debug!(task = %self.inner.name, id = %self.inner.id, failed = error.is_some(), "task body finished");
        let error_text = error.as_ref().map(ToString::to_string);
        self.emit(|task, timestamp| MonitorEvent::TaskCompleted {
            task,
            error: error_text,
            result: value.to_json(),
            timestamp,
        });

        for fork in forks {
            fork.cancel();
        }
        self.try_terminate();
    }

    /// Terminate once the body is done and every fork has detached.
    pub(crate) fn try_terminate(&self) {
        let (outcome, waiters, wakers) = {
            let mut state = self.inner.state.lock();
            if state.terminated || !state.completed || !state.body_done || !state.forks.is_empty()
            {
                return;
            }
            state.terminated = true;
            state.running = false;
            let outcome = if state.cancelled {
                Outcome::Cancelled
            } else if let Some(e) = &state.error {
                Outcome::Failed(e.clone())
            } else {
                Outcome::Completed(state.result.clone().unwrap_or_default())
            };
            state.outcome = Some(outcome.clone());
            (
                outcome,
                std::mem::take(&mut state.waiters),
                std::mem::take(&mut state.done_wakers),
            )
        };

        tracing::debug!(task = %self.inner.name, id = %self.inner.id, outcome = outcome.label(), "task terminated");
        let label = outcome.label().to_string();
        self.emit(|task, timestamp| MonitorEvent::TaskTerminated {
            task,
            outcome: label,
            timestamp,
        });

        for waiter in waiters {
            waiter(outcome.clone());
        }
        for waker in wakers {
            waker.wake();
        }
    }

    /// The body was dropped without finishing (executor shutdown). Disarm
    /// pending effects and drop every callback and waker the task holds, so
    /// nothing it was waiting on keeps it or its engine alive.
    pub(crate) fn release(&self) {
        let (effects, interrupt, waiters, wakers, forks) = {
            let mut state = self.inner.state.lock();
            state.running = false;
            state.epoch += 1;
            (
                std::mem::take(&mut state.effects),
                state.interrupt.take(),
                std::mem::take(&mut state.waiters),
                std::mem::take(&mut state.done_wakers),
                std::mem::take(&mut state.forks),
            )
        };
        tracing::trace!(task = %self.inner.name, effects = effects.len(), "task released");
        for attached in effects.values() {
            attached.resume.disarm();
        }
        drop((effects, interrupt, waiters, wakers, forks));
        // Unread messages may carry other tasks.
        self.inner.mailbox.flush(drop);
    }

    fn emit(&self, build: impl FnOnce(TaskInfo, u64) -> MonitorEvent) {
        let engine = &self.inner.engine;
        if engine.monitor().is_enabled() {
            engine.monitor().emit(build(self.info(), engine.now_ms()));
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

/// Returned by [`Task::done`].
pub struct Done {
    task: Task,
}

impl Future for Done {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut PollContext<'_>) -> Poll<Outcome> {
        let mut state = self.task.inner.state.lock();
        match &state.outcome {
            Some(outcome) => Poll::Ready(outcome.clone()),
            None => {
                state.done_wakers.push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
