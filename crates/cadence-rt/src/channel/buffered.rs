// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Buffered (async) channel.
//!
//! Put never blocks. A put that finds a waiting taker hands the message over
//! directly, so the buffer and the taker queue are never both non-empty.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use super::Taker;
use crate::buffer::{self, Buffer, BufferPolicy};
use crate::value::Value;

#[derive(Clone)]
pub struct BufferedChannel {
    inner: Arc<Inner>,
}

struct Inner {
    id: Uuid,
    state: Mutex<State>,
}

struct State {
    buffer: Box<dyn Buffer>,
    takers: VecDeque<Taker>,
    closed: bool,
}

impl BufferedChannel {
    /// Channel with the compiled default policy (sliding window of 10).
    /// Use [`Cx::channel`](crate::process::Cx::channel) for the runtime's configured default.
    pub fn new() -> Self {
        Self::with_buffer(BufferPolicy::default().build())
    }

    pub fn with_policy(policy: BufferPolicy) -> Self {
        Self::with_buffer(policy.build())
    }

    pub fn with_buffer(buffer: Box<dyn Buffer>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                state: Mutex::new(State {
                    buffer,
                    takers: VecDeque::new(),
                    closed: false,
                }),
            }),
        }
    }

    /// Channel that grows without bound.
    pub fn unbounded() -> Self {
        Self::with_buffer(buffer::unbounded())
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Non-blocking put. Ignored once closed.
    pub fn put(&self, msg: Value) {
        let taker = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            match state.takers.pop_front() {
                Some(taker) => taker,
                None => {
                    state.buffer.put(msg);
                    return;
                }
            }
        };
        taker(msg);
    }

    /// Deliver the next message, END if closed and drained, or queue `cb`.
    pub fn take(&self, cb: impl FnOnce(Value) + Send + 'static) {
        let msg = {
            let mut state = self.inner.state.lock();
            match state.buffer.take() {
                Some(msg) => msg,
                None if state.closed => Value::End,
                None => {
                    state.takers.push_back(Box::new(cb));
                    return;
                }
            }
        };
        cb(msg);
    }

    /// Drain the whole buffer as a list (END if closed and empty).
    pub fn flush(&self, cb: impl FnOnce(Value)) {
        let msg = {
            let mut state = self.inner.state.lock();
            let mut messages = Vec::with_capacity(state.buffer.len());
            while let Some(msg) = state.buffer.take() {
                messages.push(msg);
            }
            if state.closed && messages.is_empty() {
                Value::End
            } else {
                Value::List(messages)
            }
        };
        cb(msg);
    }

    /// Close and deliver END to every queued taker.
    pub fn close(&self) {
        let takers = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            std::mem::take(&mut state.takers)
        };
        for taker in takers {
            taker(Value::End);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of queued takers.
    pub fn waiting_takers(&self) -> usize {
        self.inner.state.lock().takers.len()
    }
}

impl Default for BufferedChannel {
    fn default() -> Self {
        Self::new()
    }
}
