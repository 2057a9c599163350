// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cadence runtime: a cooperative, effect-driven task scheduler.
//!
//! Processes are async bodies that describe what they want done by
//! performing effect descriptors. The interpreter resolves each descriptor
//! through a registry of effect kinds and resumes the process with the
//! result.
//!
//! Components:
//! - interpreter/engine — root entry point, effect dispatch, nested processes
//! - process — process bodies and yield points
//! - task — task records, lifecycle and outcomes
//! - effect/effects — descriptor protocol, built-in kinds and constructors
//! - channel/buffer — buffered, rendezvous, event and request/response channels
//! - exec — single-threaded executor with a real or virtual clock
//! - io/context/monitor — IO collaborator, context stores, lifecycle events

pub mod buffer;
pub mod channel;
pub mod config;
pub mod context;
pub mod effect;
pub mod effects;
pub mod engine;
pub mod error;
mod exec;
pub mod helpers;
pub mod interpreter;
pub mod io;
pub mod monitor;
pub mod process;
pub mod task;
pub mod value;

pub use buffer::{Buffer, BufferPolicy};
pub use channel::{
    is_end_of_channel, BufferedChannel, Chan, EventChannel, RequestResponseChannel,
    RequestResponseSource, SyncChannel,
};
pub use config::{ClockMode, RuntimeConfig};
pub use context::{Context, GlobalContext};
pub use effect::{Callable, Descriptor, EffectKind, Op, Registry, Resume, Yield};
pub use engine::Engine;
pub use error::{ChannelError, Error, RuntimeError};
pub use exec::RemoteHandle;
pub use helpers::{take_every, take_latest};
pub use interpreter::{Interpreter, InterpreterBuilder};
pub use io::{Io, PubSub};
pub use monitor::{Monitor, MonitorEvent, Recorder};
pub use process::{Cx, Process};
pub use task::{Outcome, Task, TaskId};
pub use value::Value;
