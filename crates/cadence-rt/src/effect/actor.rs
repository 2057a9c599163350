// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Actor-style messaging over each task's mailbox.

use super::{mismatch, Builtin, Descriptor, Op, Resume};
use crate::engine::Engine;
use crate::io::Io;
use crate::task::Task;
use crate::value::Value;

pub(super) fn kinds() -> Vec<Builtin> {
    vec![
        Builtin::new("send", send),
        Builtin::new("receive", receive),
    ]
}

/// Delivers `[message, sender]`. Messages to a task that is no longer
/// running are dropped.
fn send(effect: &Descriptor, _io: &dyn Io, _engine: &Engine, task: &Task, resume: Resume) {
    let Op::Send {
        task: target,
        message,
    } = effect.op()
    else {
        return mismatch(effect, "send", resume);
    };
    if target.is_running() {
        target
            .mailbox()
            .put(Value::List(vec![message.clone(), Value::Task(task.clone())]));
    } else {
        tracing::debug!(from = %task.name(), to = %target.name(), "dropping message to a finished task");
    }
    resume.ok(Value::Unit);
}

fn receive(_effect: &Descriptor, _io: &dyn Io, _engine: &Engine, task: &Task, resume: Resume) {
    task.mailbox().take(move |message| resume.ok(message));
}
