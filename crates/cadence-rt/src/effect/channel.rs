// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Channel operations.
//!
//! Each op checks the channel flavour it was given; the wrong flavour is a
//! malformed effect, thrown into the process.

use super::{mismatch, Builtin, Descriptor, Op, Resume};
use crate::channel::Chan;
use crate::engine::Engine;
use crate::error::Error;
use crate::io::Io;
use crate::task::Task;
use crate::value::Value;

pub(super) fn kinds() -> Vec<Builtin> {
    vec![
        Builtin::new("put-channel", put),
        Builtin::new("take-channel", take),
        Builtin::new("flush-channel", flush),
        Builtin::new("put-sync-channel", put_sync),
        Builtin::new("take-sync-channel", take_sync),
        Builtin::new("flush-sync-channel", flush_sync),
        Builtin::new("put-channel-request", put_request),
        Builtin::new("take-channel-request", take_request),
        Builtin::new("put-channel-response", put_response),
        Builtin::new("take-channel-response", take_response),
    ]
}

fn wrong_channel(effect: &Descriptor, channel: &Chan, resume: Resume) {
    resume.err(Error::malformed(
        effect.kind(),
        format!("not supported on a {} channel", channel.kind()),
    ));
}

fn put(effect: &Descriptor, _io: &dyn Io, _engine: &Engine, _task: &Task, resume: Resume) {
    let Op::PutChannel { channel, value } = effect.op() else {
        return mismatch(effect, "put-channel", resume);
    };
    match channel {
        Chan::Buffered(c) => c.put(value.clone()),
        Chan::Event(c) => c.put(value.clone()),
        other => return wrong_channel(effect, other, resume),
    }
    resume.ok(Value::Unit);
}

fn take(effect: &Descriptor, _io: &dyn Io, _engine: &Engine, _task: &Task, resume: Resume) {
    let Op::TakeChannel { channel } = effect.op() else {
        return mismatch(effect, "take-channel", resume);
    };
    match channel {
        Chan::Buffered(c) => c.take(move |v| resume.ok(v)),
        Chan::Event(c) => c.take(move |v| resume.ok(v)),
        other => wrong_channel(effect, other, resume),
    }
}

fn flush(effect: &Descriptor, _io: &dyn Io, _engine: &Engine, _task: &Task, resume: Resume) {
    let Op::FlushChannel { channel } = effect.op() else {
        return mismatch(effect, "flush-channel", resume);
    };
    match channel {
        Chan::Buffered(c) => c.flush(move |v| resume.ok(v)),
        Chan::Event(c) => c.flush(move |v| resume.ok(v)),
        other => wrong_channel(effect, other, resume),
    }
}

fn put_sync(effect: &Descriptor, _io: &dyn Io, _engine: &Engine, _task: &Task, resume: Resume) {
    let Op::PutSyncChannel { channel, value } = effect.op() else {
        return mismatch(effect, "put-sync-channel", resume);
    };
    match channel {
        Chan::Sync(c) => c.put(value.clone(), move |ack| resume.ok(ack)),
        other => wrong_channel(effect, other, resume),
    }
}

fn take_sync(effect: &Descriptor, _io: &dyn Io, _engine: &Engine, _task: &Task, resume: Resume) {
    let Op::TakeSyncChannel { channel } = effect.op() else {
        return mismatch(effect, "take-sync-channel", resume);
    };
    match channel {
        Chan::Sync(c) => c.take(move |v| resume.ok(v)),
        other => wrong_channel(effect, other, resume),
    }
}

fn flush_sync(effect: &Descriptor, _io: &dyn Io, _engine: &Engine, _task: &Task, resume: Resume) {
    let Op::FlushSyncChannel { channel } = effect.op() else {
        return mismatch(effect, "flush-sync-channel", resume);
    };
    match channel {
        Chan::Sync(c) => c.flush(move |v| resume.ok(v)),
        other => wrong_channel(effect, other, resume),
    }
}

/// Resumes with the new request id, or END if the channel is closed.
fn put_request(effect: &Descriptor, _io: &dyn Io, _engine: &Engine, _task: &Task, resume: Resume) {
    let Op::PutRequest { channel, body } = effect.op() else {
        return mismatch(effect, "put-channel-request", resume);
    };
    match channel {
        Chan::RequestResponse(c) => match c.put_request(body.clone()) {
            Some(id) => resume.ok(id),
            None => resume.ok(Value::End),
        },
        other => wrong_channel(effect, other, resume),
    }
}

fn take_request(effect: &Descriptor, _io: &dyn Io, _engine: &Engine, _task: &Task, resume: Resume) {
    let Op::TakeRequest { channel } = effect.op() else {
        return mismatch(effect, "take-channel-request", resume);
    };
    match channel {
        Chan::RequestResponse(c) => c.take_request(move |v| resume.ok(v)),
        Chan::Source(c) => c.take_request(move |v| resume.ok(v)),
        other => wrong_channel(effect, other, resume),
    }
}

fn put_response(effect: &Descriptor, _io: &dyn Io, _engine: &Engine, _task: &Task, resume: Resume) {
    let Op::PutResponse {
        channel,
        id,
        response,
    } = effect.op()
    else {
        return mismatch(effect, "put-channel-response", resume);
    };
    match channel {
        Chan::RequestResponse(c) => c.put_response(id, response.clone()),
        Chan::Source(c) => c.put_response(id, response.clone()),
        other => return wrong_channel(effect, other, resume),
    }
    resume.ok(Value::Unit);
}

fn take_response(effect: &Descriptor, _io: &dyn Io, _engine: &Engine, _task: &Task, resume: Resume) {
    let Op::TakeResponse { channel, id } = effect.op() else {
        return mismatch(effect, "take-channel-response", resume);
    };
    match channel {
        Chan::RequestResponse(c) => c.take_response(id, move |v| resume.ok(v)),
        // The source's own emitter is the response taker.
        other => wrong_channel(effect, other, resume),
    }
}
