// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Entry point: build an interpreter, run processes to completion.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigError, RuntimeConfig};
use crate::effect::{Descriptor, Middleware, Registry};
use crate::engine::Engine;
use crate::error::RuntimeError;
use crate::exec::{Executor, RemoteHandle};
use crate::io::{Io, PubSub};
use crate::monitor::Monitor;
use crate::process::Process;
use crate::task::{Outcome, Task};
use crate::value::Value;

pub struct InterpreterBuilder {
    registry: Registry,
    middleware: Vec<Middleware>,
    io: Option<Arc<dyn Io>>,
    monitor: Monitor,
    config: RuntimeConfig,
}

impl InterpreterBuilder {
    /// Replace the built-in registry.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Append a descriptor transform. Transforms run in the order added.
    pub fn middleware(
        mut self,
        transform: impl Fn(Descriptor) -> Descriptor + Send + Sync + 'static,
    ) -> Self {
        self.middleware.push(Arc::new(transform));
        self
    }

    pub fn io(mut self, io: impl Io + 'static) -> Self {
        self.io = Some(Arc::new(io));
        self
    }

    pub fn monitor(mut self, monitor: Monitor) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Interpreter {
        let executor = Executor::new(
            self.config.clock,
            Duration::from_millis(self.config.stall_timeout_ms),
        );
        let io = self.io.unwrap_or_else(|| Arc::new(PubSub::new()));
        tracing::debug!(
            clock = ?self.config.clock,
            kinds = self.registry.kinds().count(),
            middleware = self.middleware.len(),
            "interpreter built"
        );
        let engine = Engine::new(
            self.registry,
            self.middleware,
            io,
            self.monitor,
            self.config,
            executor,
        );
        Interpreter { engine }
    }
}

/// Owns the executor and the engine. Dropping it discards every task that
/// has not finished.
pub struct Interpreter {
    engine: Engine,
}

impl Interpreter {
    pub fn builder() -> InterpreterBuilder {
        InterpreterBuilder {
            registry: Registry::builtin(),
            middleware: Vec::new(),
            io: None,
            monitor: Monitor::default(),
            config: RuntimeConfig::default(),
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Interpreter configured from `CADENCE_CONFIG` / `CADENCE_CLOCK`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::builder().config(RuntimeConfig::from_env()?).build())
    }

    /// Run `process` as a root task and drive until it terminates.
    pub fn run(&self, process: &Process, args: Vec<Value>) -> Result<Outcome, RuntimeError> {
        let task = self.spawn(process, args);
        self.block_on(&task)
    }

    /// Start a root task without driving it.
    pub fn spawn(&self, process: &Process, args: Vec<Value>) -> Task {
        self.engine.spawn_process(process, args)
    }

    /// Drive the executor until `task` terminates.
    pub fn block_on(&self, task: &Task) -> Result<Outcome, RuntimeError> {
        let executor = self.engine.executor();
        executor.run_until(|| task.is_terminated())?;
        task.outcome().ok_or(RuntimeError::Stalled {
            pending: executor.pending(),
        })
    }

    /// Drive until nothing is ready and no timer is pending.
    pub fn run_until_idle(&self) {
        self.engine.executor().run_until_idle();
    }

    pub fn remote(&self) -> RemoteHandle {
        self.engine.executor().remote()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn now_ms(&self) -> u64 {
        self.engine.now_ms()
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.engine.executor().shutdown();
    }
}
