// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Effect descriptors and resolvers.
//!
//! A process yields a [`Descriptor`]; the engine looks up the resolver
//! registered for its kind and hands it a [`Resume`]. Whatever the resolver
//! does, it eventually settles the resume exactly once, and that result is
//! what the yield point evaluates to.
//!
//! Built-in kinds live in:
//! - `timing`     — delay
//! - `call`       — call, safe-call, cps, call-proc
//! - `structured` — fork, spawn, join, cancel, cancelled, self
//! - `combinator` — parallel, race
//! - `channel`    — buffered, sync and request/response channel ops
//! - `actor`      — send, receive
//! - `io`         — take, put, select, action-channel
//! - `context`    — global and local context access

mod actor;
mod call;
mod channel;
mod combinator;
mod context;
mod io;
mod structured;
mod timing;

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::{json, Value as Json};
use uuid::Uuid;

pub use call::{Callable, CpsCallback, CpsFn};

use crate::buffer::BufferPolicy;
use crate::channel::{Chan, RequestId};
use crate::engine::Engine;
use crate::error::Error;
use crate::io::Io;
use crate::process::Process;
use crate::task::Task;
use crate::value::Value;

pub type EffectId = Uuid;

/// Reads a slice of the IO state for `select`.
pub type Selector = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Descriptor transform applied to every top-level yield, in order.
pub type Middleware = Arc<dyn Fn(Descriptor) -> Descriptor + Send + Sync>;

/// One requested operation. Immutable once built.
#[derive(Clone)]
pub struct Descriptor {
    id: EffectId,
    op: Op,
}

/// Members of a `race`.
#[derive(Clone)]
pub enum RaceSet {
    List(Vec<Descriptor>),
    Labeled(IndexMap<String, Descriptor>),
}

#[derive(Clone)]
pub enum Op {
    Delay { ms: u64, value: Value },
    Call { func: Callable, args: Vec<Value> },
    SafeCall { func: Callable, args: Vec<Value> },
    Cps { func: CpsFn, args: Vec<Value> },
    CallProc { process: Process, args: Vec<Value> },
    Fork { process: Process, args: Vec<Value> },
    Spawn { process: Process, args: Vec<Value> },
    Join { task: Task },
    Cancel { task: Task },
    Cancelled,
    SelfTask,
    Parallel(Vec<Descriptor>),
    Race(RaceSet),
    PutChannel { channel: Chan, value: Value },
    TakeChannel { channel: Chan },
    FlushChannel { channel: Chan },
    PutSyncChannel { channel: Chan, value: Value },
    TakeSyncChannel { channel: Chan },
    FlushSyncChannel { channel: Chan },
    PutRequest { channel: Chan, body: Value },
    TakeRequest { channel: Chan },
    PutResponse { channel: Chan, id: RequestId, response: Value },
    TakeResponse { channel: Chan, id: RequestId },
    Send { task: Task, message: Value },
    Receive,
    Take { pattern: String },
    Put { action: Value },
    Select { selector: Option<Selector> },
    ActionChannel { pattern: String, buffer: Option<BufferPolicy> },
    GetGlobalContext,
    SetGlobalContext(IndexMap<String, Value>),
    GetLocalContext,
    SetLocalContext(IndexMap<String, Value>),
    /// Kind supplied by the embedder. `fields` is free-form.
    Custom { kind: String, fields: Value },
}

impl Op {
    pub fn kind(&self) -> &str {
        match self {
            Op::Delay { .. } => "delay",
            Op::Call { .. } => "call",
            Op::SafeCall { .. } => "safe-call",
            Op::Cps { .. } => "cps",
            Op::CallProc { .. } => "call-proc",
            Op::Fork { .. } => "fork",
            Op::Spawn { .. } => "spawn",
            Op::Join { .. } => "join",
            Op::Cancel { .. } => "cancel",
            Op::Cancelled => "cancelled",
            Op::SelfTask => "self",
            Op::Parallel(_) => "parallel",
            Op::Race(_) => "race",
            Op::PutChannel { .. } => "put-channel",
            Op::TakeChannel { .. } => "take-channel",
            Op::FlushChannel { .. } => "flush-channel",
            Op::PutSyncChannel { .. } => "put-sync-channel",
            Op::TakeSyncChannel { .. } => "take-sync-channel",
            Op::FlushSyncChannel { .. } => "flush-sync-channel",
            Op::PutRequest { .. } => "put-channel-request",
            Op::TakeRequest { .. } => "take-channel-request",
            Op::PutResponse { .. } => "put-channel-response",
            Op::TakeResponse { .. } => "take-channel-response",
            Op::Send { .. } => "send",
            Op::Receive => "receive",
            Op::Take { .. } => "take",
            Op::Put { .. } => "put",
            Op::Select { .. } => "select",
            Op::ActionChannel { .. } => "action-channel",
            Op::GetGlobalContext => "get-global-context",
            Op::SetGlobalContext(_) => "set-global-context",
            Op::GetLocalContext => "get-local-context",
            Op::SetLocalContext(_) => "set-local-context",
            Op::Custom { kind, .. } => kind,
        }
    }

    /// Kind-specific part of the monitoring projection.
    fn fields(&self) -> Json {
        match self {
            Op::Delay { ms, value } => json!({ "ms": ms, "value": value.to_json() }),
            Op::Call { func, args: a } | Op::SafeCall { func, args: a } => {
                json!({ "func": func.label(), "args": json_args(a) })
            }
            Op::Cps { args: a, .. } => json!({ "args": json_args(a) }),
            Op::CallProc { process, args: a }
            | Op::Fork { process, args: a }
            | Op::Spawn { process, args: a } => {
                json!({ "process": process.name(), "args": json_args(a) })
            }
            Op::Join { task } | Op::Cancel { task } => json!({ "task": task.id().to_string() }),
            Op::Parallel(members) => json!({ "effects": members.len() }),
            Op::Race(RaceSet::List(members)) => json!({ "effects": members.len() }),
            Op::Race(RaceSet::Labeled(members)) => {
                json!({ "labels": members.keys().collect::<Vec<_>>() })
            }
            Op::PutChannel { channel, value } | Op::PutSyncChannel { channel, value } => {
                json!({ "channel": channel.id().to_string(), "value": value.to_json() })
            }
            Op::TakeChannel { channel }
            | Op::FlushChannel { channel }
            | Op::TakeSyncChannel { channel }
            | Op::FlushSyncChannel { channel }
            | Op::TakeRequest { channel } => json!({ "channel": channel.id().to_string() }),
            Op::PutRequest { channel, body } => {
                json!({ "channel": channel.id().to_string(), "body": body.to_json() })
            }
            Op::PutResponse { channel, id, response } => json!({
                "channel": channel.id().to_string(),
                "request": id,
                "response": response.to_json(),
            }),
            Op::TakeResponse { channel, id } => {
                json!({ "channel": channel.id().to_string(), "request": id })
            }
            Op::Send { task, message } => {
                json!({ "task": task.id().to_string(), "message": message.to_json() })
            }
            Op::Take { pattern } | Op::ActionChannel { pattern, .. } => {
                json!({ "pattern": pattern })
            }
            Op::Put { action } => json!({ "action": action.to_json() }),
            Op::SetGlobalContext(update) | Op::SetLocalContext(update) => {
                json!({ "keys": update.keys().collect::<Vec<_>>() })
            }
            Op::Custom { fields, .. } => fields.to_json(),
            Op::Cancelled
            | Op::SelfTask
            | Op::Receive
            | Op::Select { .. }
            | Op::GetGlobalContext
            | Op::GetLocalContext => json!({}),
        }
    }
}

fn json_args(args: &[Value]) -> Json {
    Json::Array(args.iter().map(Value::to_json).collect())
}

impl Descriptor {
    pub fn new(op: Op) -> Self {
        Self {
            id: Uuid::new_v4(),
            op,
        }
    }

    pub fn custom(kind: impl Into<String>, fields: impl Into<Value>) -> Self {
        Self::new(Op::Custom {
            kind: kind.into(),
            fields: fields.into(),
        })
    }

    pub fn id(&self) -> EffectId {
        self.id
    }

    pub fn kind(&self) -> &str {
        self.op.kind()
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    /// Same id, different operation. For middleware that rewrites effects.
    pub fn with_op(self, op: Op) -> Self {
        Self { id: self.id, op }
    }

    /// `{kind, id, ...fields}`, the default monitoring projection.
    pub fn to_json(&self) -> Json {
        let mut out = json!({ "kind": self.kind(), "id": self.id.to_string() });
        if let (Json::Object(out), Json::Object(fields)) = (&mut out, self.op.fields()) {
            out.extend(fields);
        }
        out
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Descriptor({} {})", self.kind(), self.id)
    }
}

/// What a yield point receives: an effect to resolve, or a plain value that
/// is handed straight back.
#[derive(Debug)]
pub enum Yield {
    Effect(Descriptor),
    Value(Value),
}

impl From<Descriptor> for Yield {
    fn from(d: Descriptor) -> Self {
        Yield::Effect(d)
    }
}

impl From<Value> for Yield {
    fn from(v: Value) -> Self {
        Yield::Value(v)
    }
}

/// Resolver for one effect kind.
pub trait EffectKind: Send + Sync {
    fn kind(&self) -> &str;

    /// Perform the operation and eventually settle `resume`, exactly once.
    fn resolve(&self, effect: &Descriptor, io: &dyn Io, engine: &Engine, task: &Task, resume: Resume);

    /// JSON-safe projection for monitoring. Never includes live references.
    fn serialize(&self, effect: &Descriptor) -> Json {
        effect.to_json()
    }
}

type ResolveFn = fn(&Descriptor, &dyn Io, &Engine, &Task, Resume);

/// A built-in kind: a name and a resolver function.
pub(crate) struct Builtin {
    name: &'static str,
    resolve: ResolveFn,
}

impl Builtin {
    pub(crate) const fn new(name: &'static str, resolve: ResolveFn) -> Self {
        Self { name, resolve }
    }
}

impl EffectKind for Builtin {
    fn kind(&self) -> &str {
        self.name
    }

    fn resolve(&self, effect: &Descriptor, io: &dyn Io, engine: &Engine, task: &Task, resume: Resume) {
        (self.resolve)(effect, io, engine, task, resume)
    }
}

/// Resolvers keyed by kind name.
#[derive(Clone, Default)]
pub struct Registry {
    kinds: IndexMap<String, Arc<dyn EffectKind>>,
}

impl Registry {
    /// Empty registry. Every kind must be registered explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in kind.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let groups = [
            timing::kinds(),
            call::kinds(),
            structured::kinds(),
            combinator::kinds(),
            channel::kinds(),
            actor::kinds(),
            io::kinds(),
            context::kinds(),
        ];
        for kind in groups.into_iter().flatten() {
            registry.register(kind);
        }
        registry
    }

    /// Add or replace the resolver for `kind.kind()`.
    pub fn register(&mut self, kind: impl EffectKind + 'static) -> &mut Self {
        self.kinds.insert(kind.kind().to_string(), Arc::new(kind));
        self
    }

    pub fn with(mut self, kind: impl EffectKind + 'static) -> Self {
        self.register(kind);
        self
    }

    pub fn unregister(&mut self, kind: &str) -> bool {
        self.kinds.shift_remove(kind).is_some()
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn EffectKind>> {
        self.kinds.get(kind)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }
}

type Deliver = Box<dyn FnOnce(Result<Value, Error>) + Send>;

/// Continuation of one in-flight effect.
///
/// Settling is first-wins: later settles of the same effect (including
/// through clones) are ignored. A result that arrives after its task was
/// cancelled or failed is dropped after the effect is detached.
#[derive(Clone)]
pub struct Resume {
    inner: Arc<ResumeInner>,
}

struct ResumeInner {
    epoch: u64,
    /// Taken by the first settle, or by the task being released.
    armed: Mutex<Option<Armed>>,
}

struct Armed {
    task: Task,
    effect: Descriptor,
    deliver: Deliver,
}

impl Resume {
    pub(crate) fn new(task: &Task, effect: &Descriptor, deliver: Deliver) -> Self {
        Self {
            inner: Arc::new(ResumeInner {
                epoch: task.epoch(),
                armed: Mutex::new(Some(Armed {
                    task: task.clone(),
                    effect: effect.clone(),
                    deliver,
                })),
            }),
        }
    }

    pub fn ok(self, value: impl Into<Value>) {
        self.settle(Ok(value.into()));
    }

    pub fn err(self, error: Error) {
        self.settle(Err(error));
    }

    pub fn settle(self, result: Result<Value, Error>) {
        let Some(Armed {
            task,
            effect,
            deliver,
        }) = self.inner.armed.lock().take()
        else {
            return;
        };

        task.detach_effect(effect.id());
        task.engine().effect_settled(&effect, &task, &result);

        if task.epoch() != self.inner.epoch {
            tracing::trace!(
                kind = effect.kind(),
                task = %task.name(),
                "dropping result of effect that outlived its task"
            );
            return;
        }
        tracing::trace!(kind = effect.kind(), task = %task.name(), ok = result.is_ok(), "effect settled");
        deliver(result);
    }

    /// The owning task was cancelled, failed or released since this effect started.
    pub fn is_stale(&self) -> bool {
        match &*self.inner.armed.lock() {
            Some(armed) => armed.task.epoch() != self.inner.epoch,
            None => true,
        }
    }

    pub(crate) fn downgrade(&self) -> WeakResume {
        WeakResume(Arc::downgrade(&self.inner))
    }
}

/// Handle a task keeps on each of its pending effects.
pub(crate) struct WeakResume(Weak<ResumeInner>);

impl WeakResume {
    /// Drop the continuation without settling. Whoever still holds the
    /// resume (a channel, a subscriber) then holds nothing that leads back
    /// to the task.
    pub(crate) fn disarm(&self) {
        if let Some(inner) = self.0.upgrade() {
            let armed = inner.armed.lock().take();
            drop(armed);
        }
    }
}

/// Reject a descriptor whose operation does not belong to the resolver.
pub(crate) fn mismatch(effect: &Descriptor, expected: &str, resume: Resume) {
    resume.err(Error::malformed(
        expected,
        format!("resolver received a `{}` descriptor", effect.kind()),
    ));
}
