// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Structured concurrency: fork, spawn, join, cancel, cancelled, self.
//!
//! Cancellation flows down through attached forks and up through `join`.
//! Spawned tasks sit outside both paths.

use super::{mismatch, Builtin, Descriptor, Op, Resume};
use crate::engine::Engine;
use crate::io::Io;
use crate::task::{Outcome, Task};
use crate::value::Value;

pub(super) fn kinds() -> Vec<Builtin> {
    vec![
        Builtin::new("fork", fork),
        Builtin::new("spawn", spawn),
        Builtin::new("join", join),
        Builtin::new("cancel", cancel),
        Builtin::new("cancelled", cancelled),
        Builtin::new("self", self_task),
    ]
}

fn fork(effect: &Descriptor, _io: &dyn Io, engine: &Engine, task: &Task, resume: Resume) {
    let Op::Fork { process, args } = effect.op() else {
        return mismatch(effect, "fork", resume);
    };
    let child = engine.run_process(process, args.clone(), Some(task), |child| {
        task.attach_fork(child);
        let parent = task.clone();
        let detached = child.clone();
        child.on_complete(move |_| parent.detach_fork(&detached));
    });
    resume.ok(child);
}

fn spawn(effect: &Descriptor, _io: &dyn Io, engine: &Engine, task: &Task, resume: Resume) {
    let Op::Spawn { process, args } = effect.op() else {
        return mismatch(effect, "spawn", resume);
    };
    let child = engine.run_process(process, args.clone(), Some(task), |child| {
        let name = child.name().to_string();
        child.on_complete(move |outcome| {
            if let Outcome::Failed(error) = outcome {
                tracing::error!(task = %name, %error, "spawned task failed");
            }
        });
    });
    resume.ok(child);
}

fn join(effect: &Descriptor, _io: &dyn Io, _engine: &Engine, task: &Task, resume: Resume) {
    let Op::Join { task: target } = effect.op() else {
        return mismatch(effect, "join", resume);
    };
    let caller = task.clone();
    target.on_complete(move |outcome| match outcome {
        Outcome::Completed(value) => resume.ok(value),
        Outcome::Failed(error) => resume.err(error),
        Outcome::Cancelled => {
            if !caller.is_cancelled() {
                tracing::debug!(task = %caller.name(), "joined task was cancelled, cancelling caller");
                caller.cancel();
            }
            resume.ok(Value::Unit);
        }
    });
}

fn cancel(effect: &Descriptor, _io: &dyn Io, _engine: &Engine, _task: &Task, resume: Resume) {
    let Op::Cancel { task: target } = effect.op() else {
        return mismatch(effect, "cancel", resume);
    };
    target.cancel();
    resume.ok(Value::Unit);
}

fn cancelled(_effect: &Descriptor, _io: &dyn Io, _engine: &Engine, task: &Task, resume: Resume) {
    resume.ok(task.is_cancelled());
}

fn self_task(_effect: &Descriptor, _io: &dyn Io, _engine: &Engine, task: &Task, resume: Resume) {
    resume.ok(task.clone());
}
