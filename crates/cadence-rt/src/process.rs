// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Processes and their yield points.
//!
//! A process is a named async body. Each `cx.perform(..).await` is a yield
//! point: the effect goes through middleware and the engine, and the body
//! is suspended until the effect settles or the task is cancelled.
//!
//! ```ignore
//! let worker = Process::new("worker", |cx, _args| async move {
//!     let v = cx.perform(effects::delay(10, "tick")).await?;
//!     Ok(v)
//! });
//! ```

use std::fmt;
use std::future::{self, Future};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as PollContext, Poll};

use crate::channel::BufferedChannel;
use crate::context::Context;
use crate::effect::Yield;
use crate::engine::Engine;
use crate::error::{panic_message, Error};
use crate::task::{Slot, Task};
use crate::value::Value;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

type Body = dyn Fn(Cx, Vec<Value>) -> BoxFuture<Result<Value, Error>> + Send + Sync;

/// A named, restartable process body.
#[derive(Clone)]
pub struct Process {
    name: Arc<str>,
    body: Arc<Body>,
}

impl Process {
    pub fn new<F, Fut>(name: &str, body: F) -> Self
    where
        F: Fn(Cx, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Error>> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(move |cx, args| Box::pin(body(cx, args))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build the body future. A panic while building it becomes the body's error.
    pub(crate) fn start(&self, cx: Cx, args: Vec<Value>) -> BoxFuture<Result<Value, Error>> {
        match catch_unwind(AssertUnwindSafe(|| (self.body)(cx, args))) {
            Ok(body) => body,
            Err(payload) => Box::pin(future::ready(Err(Error::Panicked(panic_message(payload))))),
        }
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Process({})", self.name)
    }
}

/// What a running body sees of its task: the `this` of the process.
#[derive(Clone)]
pub struct Cx {
    task: Task,
    engine: Engine,
}

impl Cx {
    pub(crate) fn new(task: Task, engine: Engine) -> Self {
        Self { task, engine }
    }

    /// Yield an effect (or a plain value, handed straight back).
    pub fn perform(&self, y: impl Into<Yield>) -> Perform {
        Perform {
            task: self.task.clone(),
            engine: self.engine.clone(),
            state: PerformState::Start(y.into()),
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn context(&self) -> &Context {
        self.task.context()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Buffered channel with the runtime's configured default policy.
    pub fn channel(&self) -> BufferedChannel {
        self.engine.channel()
    }
}

enum PerformState {
    Start(Yield),
    Waiting(Arc<Slot>),
    Done,
}

/// Future of one yield point. Resolves to `Err(Error::Cancelled)` if the
/// task is cancelled while suspended here.
pub struct Perform {
    task: Task,
    engine: Engine,
    state: PerformState,
}

impl Perform {
    fn start(&mut self, y: Yield) -> Result<Arc<Slot>, Result<Value, Error>> {
        if self.task.take_cancel_pending() {
            return Err(Err(Error::Cancelled));
        }
        let effect = match y {
            Yield::Effect(effect) => effect,
            Yield::Value(value) => {
                if self.engine.config().warn_on_plain_yield {
                    tracing::warn!(task = %self.task.name(), "plain value yielded, passing it through");
                }
                return Err(Ok(value));
            }
        };
        let engine = &self.engine;
        let effect = catch_unwind(AssertUnwindSafe(|| engine.apply_middleware(effect)))
            .map_err(|payload| Err(Error::Panicked(panic_message(payload))))?;

        let slot = Slot::new();
        self.task.set_interrupt(slot.clone());
        let fill = slot.clone();
        self.engine.resolve_descriptor(
            effect,
            &self.task,
            Box::new(move |result| {
                fill.fill(result);
            }),
        );
        Ok(slot)
    }
}

impl Future for Perform {
    type Output = Result<Value, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut PollContext<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        loop {
            match std::mem::replace(&mut this.state, PerformState::Done) {
                PerformState::Start(y) => match this.start(y) {
                    Ok(slot) => this.state = PerformState::Waiting(slot),
                    Err(immediate) => return Poll::Ready(immediate),
                },
                PerformState::Waiting(slot) => match slot.poll(cx.waker()) {
                    Poll::Ready(result) => {
                        this.task.clear_interrupt(&slot);
                        return Poll::Ready(result);
                    }
                    Poll::Pending => {
                        this.state = PerformState::Waiting(slot);
                        return Poll::Pending;
                    }
                },
                PerformState::Done => panic!("`Perform` polled after completion"),
            }
        }
    }
}

/// Turns a panic inside the wrapped future into `Error::Panicked`.
pub(crate) struct CatchPanic {
    inner: BoxFuture<Result<Value, Error>>,
}

impl CatchPanic {
    pub(crate) fn new(inner: BoxFuture<Result<Value, Error>>) -> Self {
        Self { inner }
    }
}

impl Future for CatchPanic {
    type Output = Result<Value, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut PollContext<'_>) -> Poll<Self::Output> {
        let inner = &mut self.inner;
        match catch_unwind(AssertUnwindSafe(|| inner.as_mut().poll(cx))) {
            Ok(poll) => poll,
            Err(payload) => Poll::Ready(Err(Error::Panicked(panic_message(payload)))),
        }
    }
}

/// Executor-side driver of one task body.
pub(crate) async fn drive(task: Task, body: BoxFuture<Result<Value, Error>>) {
    let mut guard = Unfinished(Some(task.clone()));
    if task.is_cancelled() {
        tracing::debug!(task = %task.name(), "cancelled before first poll");
        drop(body);
        task.finish_body(Err(Error::Cancelled));
    } else {
        let result = CatchPanic::new(body).await;
        task.finish_body(result);
    }
    guard.0 = None;
}

/// Releases the task if its driver is dropped before the body finished.
struct Unfinished(Option<Task>);

impl Drop for Unfinished {
    fn drop(&mut self) {
        if let Some(task) = self.0.take() {
            task.release();
        }
    }
}
