// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Constructors for every built-in effect.
//!
//! Constructors are pure: they only build a [`Descriptor`]. Nothing happens
//! until a process performs it.

use indexmap::IndexMap;

use crate::buffer::BufferPolicy;
use crate::channel::Chan;
use crate::effect::{Callable, CpsCallback, Descriptor, Op, RaceSet};
use crate::process::Process;
use crate::task::Task;
use crate::value::Value;

fn update<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> IndexMap<String, Value>
where
    K: Into<String>,
    V: Into<Value>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

// Timing and calls

pub fn delay(ms: u64, value: impl Into<Value>) -> Descriptor {
    Descriptor::new(Op::Delay {
        ms,
        value: value.into(),
    })
}

pub fn call(func: Callable, args: Vec<Value>) -> Descriptor {
    Descriptor::new(Op::Call { func, args })
}

/// Never throws: resumes with `[error, value]`, one of them unit.
pub fn safe_call(func: Callable, args: Vec<Value>) -> Descriptor {
    Descriptor::new(Op::SafeCall { func, args })
}

pub fn cps(
    func: impl Fn(Vec<Value>, Task, CpsCallback) + Send + Sync + 'static,
    args: Vec<Value>,
) -> Descriptor {
    Descriptor::new(Op::Cps {
        func: std::sync::Arc::new(func),
        args,
    })
}

pub fn call_proc(process: &Process, args: Vec<Value>) -> Descriptor {
    Descriptor::new(Op::CallProc {
        process: process.clone(),
        args,
    })
}

// Structured concurrency

pub fn fork(process: &Process, args: Vec<Value>) -> Descriptor {
    Descriptor::new(Op::Fork {
        process: process.clone(),
        args,
    })
}

pub fn spawn(process: &Process, args: Vec<Value>) -> Descriptor {
    Descriptor::new(Op::Spawn {
        process: process.clone(),
        args,
    })
}

pub fn join(task: &Task) -> Descriptor {
    Descriptor::new(Op::Join { task: task.clone() })
}

pub fn cancel(task: &Task) -> Descriptor {
    Descriptor::new(Op::Cancel { task: task.clone() })
}

pub fn cancelled() -> Descriptor {
    Descriptor::new(Op::Cancelled)
}

pub fn self_task() -> Descriptor {
    Descriptor::new(Op::SelfTask)
}

// Combinators

pub fn parallel(effects: Vec<Descriptor>) -> Descriptor {
    Descriptor::new(Op::Parallel(effects))
}

/// Resumes with the first member to settle.
pub fn race(effects: Vec<Descriptor>) -> Descriptor {
    Descriptor::new(Op::Race(RaceSet::List(effects)))
}

/// Resumes with `{label: value}` for the first member to settle.
pub fn race_labeled<K: Into<String>>(effects: impl IntoIterator<Item = (K, Descriptor)>) -> Descriptor {
    let members = effects.into_iter().map(|(k, d)| (k.into(), d)).collect();
    Descriptor::new(Op::Race(RaceSet::Labeled(members)))
}

// Channels

pub fn put_channel(channel: impl Into<Chan>, value: impl Into<Value>) -> Descriptor {
    Descriptor::new(Op::PutChannel {
        channel: channel.into(),
        value: value.into(),
    })
}

pub fn take_channel(channel: impl Into<Chan>) -> Descriptor {
    Descriptor::new(Op::TakeChannel {
        channel: channel.into(),
    })
}

pub fn flush_channel(channel: impl Into<Chan>) -> Descriptor {
    Descriptor::new(Op::FlushChannel {
        channel: channel.into(),
    })
}

pub fn put_sync_channel(channel: impl Into<Chan>, value: impl Into<Value>) -> Descriptor {
    Descriptor::new(Op::PutSyncChannel {
        channel: channel.into(),
        value: value.into(),
    })
}

pub fn take_sync_channel(channel: impl Into<Chan>) -> Descriptor {
    Descriptor::new(Op::TakeSyncChannel {
        channel: channel.into(),
    })
}

pub fn flush_sync_channel(channel: impl Into<Chan>) -> Descriptor {
    Descriptor::new(Op::FlushSyncChannel {
        channel: channel.into(),
    })
}

pub fn put_request(channel: impl Into<Chan>, body: impl Into<Value>) -> Descriptor {
    Descriptor::new(Op::PutRequest {
        channel: channel.into(),
        body: body.into(),
    })
}

pub fn take_request(channel: impl Into<Chan>) -> Descriptor {
    Descriptor::new(Op::TakeRequest {
        channel: channel.into(),
    })
}

pub fn put_response(
    channel: impl Into<Chan>,
    id: impl Into<String>,
    response: impl Into<Value>,
) -> Descriptor {
    Descriptor::new(Op::PutResponse {
        channel: channel.into(),
        id: id.into(),
        response: response.into(),
    })
}

pub fn take_response(channel: impl Into<Chan>, id: impl Into<String>) -> Descriptor {
    Descriptor::new(Op::TakeResponse {
        channel: channel.into(),
        id: id.into(),
    })
}

// Actors

pub fn send(task: &Task, message: impl Into<Value>) -> Descriptor {
    Descriptor::new(Op::Send {
        task: task.clone(),
        message: message.into(),
    })
}

/// Resumes with `[message, sender]`.
pub fn receive() -> Descriptor {
    Descriptor::new(Op::Receive)
}

// IO

pub fn take(pattern: impl Into<String>) -> Descriptor {
    Descriptor::new(Op::Take {
        pattern: pattern.into(),
    })
}

pub fn put(action: impl Into<Value>) -> Descriptor {
    Descriptor::new(Op::Put {
        action: action.into(),
    })
}

/// Whole IO state.
pub fn select() -> Descriptor {
    Descriptor::new(Op::Select { selector: None })
}

pub fn select_with(selector: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Descriptor {
    Descriptor::new(Op::Select {
        selector: Some(std::sync::Arc::new(selector)),
    })
}

/// Event channel of every matching action, unbounded.
pub fn action_channel(pattern: impl Into<String>) -> Descriptor {
    Descriptor::new(Op::ActionChannel {
        pattern: pattern.into(),
        buffer: None,
    })
}

pub fn action_channel_with(pattern: impl Into<String>, buffer: BufferPolicy) -> Descriptor {
    Descriptor::new(Op::ActionChannel {
        pattern: pattern.into(),
        buffer: Some(buffer),
    })
}

// Context

pub fn get_global_context() -> Descriptor {
    Descriptor::new(Op::GetGlobalContext)
}

pub fn set_global_context<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Descriptor
where
    K: Into<String>,
    V: Into<Value>,
{
    Descriptor::new(Op::SetGlobalContext(update(entries)))
}

pub fn get_local_context() -> Descriptor {
    Descriptor::new(Op::GetLocalContext)
}

pub fn set_local_context<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Descriptor
where
    K: Into<String>,
    V: Into<Value>,
{
    Descriptor::new(Op::SetLocalContext(update(entries)))
}
