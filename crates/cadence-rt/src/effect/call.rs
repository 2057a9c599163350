// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Host function calls and nested processes.
//!
//! Host functions run on the executor thread. A panic inside one is caught
//! and thrown into the calling process as `Error::Panicked`.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::{mismatch, Builtin, Descriptor, Op, Resume};
use crate::engine::Engine;
use crate::error::{panic_message, Error};
use crate::io::Io;
use crate::process::{BoxFuture, CatchPanic};
use crate::task::Task;
use crate::value::Value;

type SyncFn = dyn Fn(Vec<Value>) -> Result<Value, Error> + Send + Sync;
type AsyncFn = dyn Fn(Vec<Value>) -> BoxFuture<Result<Value, Error>> + Send + Sync;

/// Callback handed to a continuation-passing host function.
pub type CpsCallback = Box<dyn FnOnce(Result<Value, Error>) + Send>;

/// Continuation-passing host function: `(args, task, callback)`.
pub type CpsFn = Arc<dyn Fn(Vec<Value>, Task, CpsCallback) + Send + Sync>;

/// A host function callable through `call` and `safe-call`.
#[derive(Clone)]
pub enum Callable {
    Sync { name: Arc<str>, func: Arc<SyncFn> },
    Async { name: Arc<str>, func: Arc<AsyncFn> },
}

impl Callable {
    pub fn sync(
        name: &str,
        func: impl Fn(Vec<Value>) -> Result<Value, Error> + Send + Sync + 'static,
    ) -> Self {
        Callable::Sync {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    /// Function returning a future, polled on the executor.
    pub fn future<F, Fut>(name: &str, func: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, Error>> + Send + 'static,
    {
        Callable::Async {
            name: name.into(),
            func: Arc::new(move |args| Box::pin(func(args))),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Callable::Sync { name, .. } | Callable::Async { name, .. } => name,
        }
    }
}

pub(super) fn kinds() -> Vec<Builtin> {
    vec![
        Builtin::new("call", call),
        Builtin::new("safe-call", safe_call),
        Builtin::new("cps", cps),
        Builtin::new("call-proc", call_proc),
    ]
}

fn invoke(
    func: &Callable,
    args: Vec<Value>,
    engine: &Engine,
    settle: impl FnOnce(Result<Value, Error>) + Send + 'static,
) {
    match func {
        Callable::Sync { func, .. } => {
            let result = catch_unwind(AssertUnwindSafe(|| func(args)))
                .unwrap_or_else(|payload| Err(Error::Panicked(panic_message(payload))));
            settle(result);
        }
        Callable::Async { func, .. } => match catch_unwind(AssertUnwindSafe(|| func(args))) {
            Ok(future) => engine.spawn_future(async move {
                let result = CatchPanic::new(future).await;
                settle(result);
            }),
            Err(payload) => settle(Err(Error::Panicked(panic_message(payload)))),
        },
    }
}

fn call(effect: &Descriptor, _io: &dyn Io, engine: &Engine, _task: &Task, resume: Resume) {
    let Op::Call { func, args } = effect.op() else {
        return mismatch(effect, "call", resume);
    };
    invoke(func, args.clone(), engine, move |result| resume.settle(result));
}

/// `[error, value]` pair: exactly one side is unit.
fn error_first(result: Result<Value, Error>) -> Value {
    match result {
        Ok(value) => Value::List(vec![Value::Unit, value]),
        Err(e) => Value::List(vec![Value::String(e.to_string()), Value::Unit]),
    }
}

fn safe_call(effect: &Descriptor, _io: &dyn Io, engine: &Engine, _task: &Task, resume: Resume) {
    let Op::SafeCall { func, args } = effect.op() else {
        return mismatch(effect, "safe-call", resume);
    };
    invoke(func, args.clone(), engine, move |result| {
        resume.ok(error_first(result))
    });
}

fn cps(effect: &Descriptor, _io: &dyn Io, _engine: &Engine, task: &Task, resume: Resume) {
    let Op::Cps { func, args } = effect.op() else {
        return mismatch(effect, "cps", resume);
    };
    let backup = resume.clone();
    let callback: CpsCallback = Box::new(move |result| resume.settle(result));
    let outcome = catch_unwind(AssertUnwindSafe(|| func(args.clone(), task.clone(), callback)));
    if let Err(payload) = outcome {
        backup.err(Error::Panicked(panic_message(payload)));
    }
}

fn call_proc(effect: &Descriptor, _io: &dyn Io, engine: &Engine, task: &Task, resume: Resume) {
    let Op::CallProc { process, args } = effect.op() else {
        return mismatch(effect, "call-proc", resume);
    };
    engine.run_process(process, args.clone(), Some(task), |child| {
        child.on_complete(move |outcome| resume.settle(outcome.into_result()));
    });
}
