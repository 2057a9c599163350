// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Global and task-local context access.
//!
//! Reads return a merged map snapshot. Writes merge a map of updates; local
//! writes land in the calling task's own layer only.

use super::{mismatch, Builtin, Descriptor, Op, Resume};
use crate::engine::Engine;
use crate::io::Io;
use crate::task::Task;
use crate::value::Value;

pub(super) fn kinds() -> Vec<Builtin> {
    vec![
        Builtin::new("get-global-context", get_global),
        Builtin::new("set-global-context", set_global),
        Builtin::new("get-local-context", get_local),
        Builtin::new("set-local-context", set_local),
    ]
}

fn get_global(_effect: &Descriptor, _io: &dyn Io, engine: &Engine, _task: &Task, resume: Resume) {
    resume.ok(Value::Map(engine.global_context().snapshot()));
}

fn set_global(effect: &Descriptor, _io: &dyn Io, engine: &Engine, _task: &Task, resume: Resume) {
    let Op::SetGlobalContext(update) = effect.op() else {
        return mismatch(effect, "set-global-context", resume);
    };
    let global = engine.global_context();
    for (key, value) in update {
        global.set(key.clone(), value.clone());
    }
    resume.ok(Value::Unit);
}

fn get_local(_effect: &Descriptor, _io: &dyn Io, _engine: &Engine, task: &Task, resume: Resume) {
    resume.ok(Value::Map(task.context().snapshot()));
}

fn set_local(effect: &Descriptor, _io: &dyn Io, _engine: &Engine, task: &Task, resume: Resume) {
    let Op::SetLocalContext(update) = effect.op() else {
        return mismatch(effect, "set-local-context", resume);
    };
    for (key, value) in update {
        task.context().set(key.clone(), value.clone());
    }
    resume.ok(Value::Unit);
}
