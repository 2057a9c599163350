// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The engine resolvers are handed: effect dispatch, nested processes and
//! access to the shared runtime pieces.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value as Json;

use crate::buffer::BufferPolicy;
use crate::channel::BufferedChannel;
use crate::config::RuntimeConfig;
use crate::context::{Context, GlobalContext};
use crate::effect::{Descriptor, Middleware, Registry, Resume};
use crate::error::{panic_message, Error};
use crate::exec::Executor;
use crate::io::Io;
use crate::monitor::{Monitor, MonitorEvent};
use crate::process::{drive, BoxFuture, Cx, Process};
use crate::task::Task;
use crate::value::Value;

/// Receives the result of one effect, if its task is still live.
pub type Deliver = Box<dyn FnOnce(Result<Value, Error>) + Send>;

struct EngineInner {
    registry: Registry,
    middleware: Vec<Middleware>,
    io: Arc<dyn Io>,
    monitor: Monitor,
    config: RuntimeConfig,
    global: GlobalContext,
    executor: Executor,
}

#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub(crate) fn new(
        registry: Registry,
        middleware: Vec<Middleware>,
        io: Arc<dyn Io>,
        monitor: Monitor,
        config: RuntimeConfig,
        executor: Executor,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry,
                middleware,
                io,
                monitor,
                config,
                global: GlobalContext::new(),
                executor,
            }),
        }
    }

    /// Resolve `effect` on behalf of `task`; `deliver` receives the result.
    ///
    /// Used for top-level yields (after middleware) and by combinators for
    /// their members. An unknown kind or a panicking resolver settles with
    /// an error instead of unwinding into the caller.
    pub fn resolve_descriptor(&self, effect: Descriptor, task: &Task, deliver: Deliver) {
        let resume = Resume::new(task, &effect, deliver);
        task.attach_effect(&effect, &resume);
        if self.inner.monitor.is_enabled() {
            let projection = self.serialize(&effect);
            let timestamp = self.now_ms();
            self.inner.monitor.emit(MonitorEvent::EffectTriggered {
                effect: projection.clone(),
                task: task.info(),
                timestamp,
            });
            self.inner.monitor.emit(MonitorEvent::EffectAttached {
                effect: projection,
                task: task.info(),
                timestamp,
            });
        }

        let Some(kind) = self.inner.registry.get(effect.kind()).cloned() else {
            tracing::trace!(kind = effect.kind(), task = %task.name(), "unknown effect kind");
            return resume.err(Error::UnknownEffect(effect.kind().to_string()));
        };
        tracing::trace!(kind = effect.kind(), task = %task.name(), "resolving effect");

        let backup = resume.clone();
        let io = self.inner.io.clone();
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            kind.resolve(&effect, io.as_ref(), self, task, resume)
        }));
        if let Err(payload) = outcome {
            backup.err(Error::Panicked(panic_message(payload)));
        }
    }

    /// Start `process` as a new task and poll its body up to the first
    /// yield before returning. `parent` only supplies the context to inherit
    /// from; `setup` runs before that first poll, so attachments and
    /// completion callbacks are in place even if the body finishes at once.
    ///
    /// Must be called on the executor thread, as resolvers are.
    pub fn run_process(
        &self,
        process: &Process,
        args: Vec<Value>,
        parent: Option<&Task>,
        setup: impl FnOnce(&Task),
    ) -> Task {
        let (task, body) = self.create(process, args, parent);
        setup(&task);
        self.inner.executor.spawn_now(drive(task.clone(), body));
        task
    }

    /// Start a root task. Its body is first polled by the run loop.
    pub(crate) fn spawn_process(&self, process: &Process, args: Vec<Value>) -> Task {
        let (task, body) = self.create(process, args, None);
        self.inner.executor.spawn(drive(task.clone(), body));
        task
    }

    fn create(
        &self,
        process: &Process,
        args: Vec<Value>,
        parent: Option<&Task>,
    ) -> (Task, BoxFuture<Result<Value, Error>>) {
        let context = parent.map_or_else(Context::new, |p| p.context().child());
        let task = Task::new(process.name(), context, self.clone());
        tracing::debug!(task = %task.name(), id = %task.id(), "task created");
        if self.inner.monitor.is_enabled() {
            self.inner.monitor.emit(MonitorEvent::TaskCreated {
                task: task.info(),
                parent: parent.map(Task::info),
                timestamp: self.now_ms(),
            });
        }
        let body = process.start(Cx::new(task.clone(), self.clone()), args);
        (task, body)
    }

    /// Poll `future` on the executor.
    pub fn spawn_future(&self, future: impl Future<Output = ()> + Send + 'static) {
        self.inner.executor.spawn(future);
    }

    /// Run `callback` after `delay_ms` on the runtime clock.
    pub fn schedule(&self, delay_ms: u64, callback: impl FnOnce() + Send + 'static) {
        self.inner.executor.schedule(delay_ms, callback);
    }

    pub fn now_ms(&self) -> u64 {
        self.inner.executor.now_ms()
    }

    pub fn io(&self) -> &dyn Io {
        self.inner.io.as_ref()
    }

    pub fn monitor(&self) -> &Monitor {
        &self.inner.monitor
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn global_context(&self) -> &GlobalContext {
        &self.inner.global
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn default_buffer(&self) -> BufferPolicy {
        self.inner.config.default_buffer
    }

    /// Buffered channel using `RuntimeConfig::default_buffer`.
    /// `BufferedChannel::new` ignores configuration.
    pub fn channel(&self) -> BufferedChannel {
        BufferedChannel::with_policy(self.default_buffer())
    }

    /// Monitoring projection, from the kind's own `serialize` when registered.
    pub fn serialize(&self, effect: &Descriptor) -> Json {
        match self.inner.registry.get(effect.kind()) {
            Some(kind) => kind.serialize(effect),
            None => effect.to_json(),
        }
    }

    pub(crate) fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    pub(crate) fn apply_middleware(&self, effect: Descriptor) -> Descriptor {
        self.inner
            .middleware
            .iter()
            .fold(effect, |effect, transform| transform(effect))
    }

    /// Monitoring for a settled effect: resolved or rejected, then detached.
    pub(crate) fn effect_settled(&self, effect: &Descriptor, task: &Task, result: &Result<Value, Error>) {
        if !self.inner.monitor.is_enabled() {
            return;
        }
        let projection = self.serialize(effect);
        let timestamp = self.now_ms();
        let settled = match result {
            Ok(value) => MonitorEvent::EffectResolved {
                effect: projection.clone(),
                result: value.to_json(),
                timestamp,
            },
            Err(error) => MonitorEvent::EffectRejected {
                effect: projection.clone(),
                reason: error.to_string(),
                timestamp,
            },
        };
        self.inner.monitor.emit(settled);
        self.inner.monitor.emit(MonitorEvent::EffectDetached {
            effect: projection,
            task: task.info(),
            timestamp,
        });
    }
}
