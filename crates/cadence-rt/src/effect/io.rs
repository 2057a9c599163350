// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Effects backed by the IO collaborator.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{mismatch, Builtin, Descriptor, Op, Resume};
use crate::buffer::BufferPolicy;
use crate::channel::{EventChannel, Unsubscribe};
use crate::engine::Engine;
use crate::error::Error;
use crate::io::{Io, Listener};
use crate::task::Task;
use crate::value::Value;

pub(super) fn kinds() -> Vec<Builtin> {
    vec![
        Builtin::new("take", take),
        Builtin::new("put", put),
        Builtin::new("select", select),
        Builtin::new("action-channel", action_channel),
    ]
}

/// Resume with the next matching action, then unsubscribe.
fn take(effect: &Descriptor, io: &dyn Io, _engine: &Engine, _task: &Task, resume: Resume) {
    let Op::Take { pattern } = effect.op() else {
        return mismatch(effect, "take", resume);
    };
    let pending = Arc::new(Mutex::new(Some(resume)));
    let handle: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));

    let listener: Listener = {
        let pending = pending.clone();
        let handle = handle.clone();
        Arc::new(move |action| {
            let Some(resume) = pending.lock().take() else {
                return;
            };
            let unsubscribe = handle.lock().take();
            if let Some(unsubscribe) = unsubscribe {
                unsubscribe();
            }
            resume.ok(action);
        })
    };

    let unsubscribe = io.subscribe(pattern, listener);
    let mut slot = handle.lock();
    if pending.lock().is_none() {
        // Matched while subscribing.
        drop(slot);
        unsubscribe();
    } else {
        *slot = Some(unsubscribe);
    }
}

fn put(effect: &Descriptor, io: &dyn Io, _engine: &Engine, _task: &Task, resume: Resume) {
    let Op::Put { action } = effect.op() else {
        return mismatch(effect, "put", resume);
    };
    resume.settle(io.dispatch(action.clone()));
}

fn select(effect: &Descriptor, io: &dyn Io, _engine: &Engine, _task: &Task, resume: Resume) {
    let Op::Select { selector } = effect.op() else {
        return mismatch(effect, "select", resume);
    };
    let state = io.get_state();
    match selector {
        Some(selector) => resume.ok(selector(&state)),
        None => resume.ok(state),
    }
}

fn action_channel(effect: &Descriptor, io: &dyn Io, _engine: &Engine, _task: &Task, resume: Resume) {
    let Op::ActionChannel { pattern, buffer } = effect.op() else {
        return mismatch(effect, "action-channel", resume);
    };
    let buffer = buffer.unwrap_or(BufferPolicy::Unbounded).build();
    let channel = EventChannel::new(
        |emitter| {
            let listener: Listener = Arc::new(move |action| emitter.emit(action));
            Some(io.subscribe(pattern, listener))
        },
        buffer,
    );
    match channel {
        Ok(channel) => resume.ok(channel),
        Err(e) => resume.err(Error::Failed(e.to_string())),
    }
}
