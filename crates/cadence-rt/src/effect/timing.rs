// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `delay`: resume with a value once time has passed on the runtime clock.

use super::{mismatch, Builtin, Descriptor, Op, Resume};
use crate::engine::Engine;
use crate::io::Io;
use crate::task::Task;

pub(super) fn kinds() -> Vec<Builtin> {
    vec![Builtin::new("delay", delay)]
}

fn delay(effect: &Descriptor, _io: &dyn Io, engine: &Engine, _task: &Task, resume: Resume) {
    let Op::Delay { ms, value } = effect.op() else {
        return mismatch(effect, "delay", resume);
    };
    let value = value.clone();
    engine.schedule(*ms, move || resume.ok(value));
}
