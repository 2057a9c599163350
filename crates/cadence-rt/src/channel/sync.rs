// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Synchronous (rendezvous) channel.
//!
//! A put only queues when no taker waits, and a take only queues when no
//! putter waits. The putter's ack fires after the taker got the message.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use super::Taker;
use crate::value::Value;

/// Acknowledgment for a put: `Unit` on handoff, END if the channel closed.
pub type Ack = Box<dyn FnOnce(Value) + Send>;

#[derive(Clone)]
pub struct SyncChannel {
    inner: Arc<Inner>,
}

struct Inner {
    id: Uuid,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    putters: VecDeque<(Value, Ack)>,
    takers: VecDeque<Taker>,
    closed: bool,
}

impl SyncChannel {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn put(&self, msg: Value, ack: impl FnOnce(Value) + Send + 'static) {
        let taker = {
            let mut state = self.inner.state.lock();
            if state.closed {
                drop(state);
                ack(Value::End);
                return;
            }
            match state.takers.pop_front() {
                Some(taker) => taker,
                None => {
                    state.putters.push_back((msg, Box::new(ack)));
                    return;
                }
            }
        };
        taker(msg);
        ack(Value::Unit);
    }

    pub fn take(&self, cb: impl FnOnce(Value) + Send + 'static) {
        let (msg, ack) = {
            let mut state = self.inner.state.lock();
            match state.putters.pop_front() {
                Some(pair) => pair,
                None if state.closed => {
                    drop(state);
                    cb(Value::End);
                    return;
                }
                None => {
                    state.takers.push_back(Box::new(cb));
                    return;
                }
            }
        };
        cb(msg);
        ack(Value::Unit);
    }

    /// Accept every pending put at once, acking each putter.
    pub fn flush(&self, cb: impl FnOnce(Value)) {
        let (pending, closed) = {
            let mut state = self.inner.state.lock();
            (std::mem::take(&mut state.putters), state.closed)
        };
        let mut messages = Vec::with_capacity(pending.len());
        for (msg, ack) in pending {
            ack(Value::Unit);
            messages.push(msg);
        }
        if closed && messages.is_empty() {
            cb(Value::End);
        } else {
            cb(Value::List(messages));
        }
    }

    /// Close and deliver END to every queued party on both sides.
    pub fn close(&self) {
        let (takers, putters) = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            (
                std::mem::take(&mut state.takers),
                std::mem::take(&mut state.putters),
            )
        };
        for taker in takers {
            taker(Value::End);
        }
        for (_, ack) in putters {
            ack(Value::End);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn waiting_putters(&self) -> usize {
        self.inner.state.lock().putters.len()
    }

    pub fn waiting_takers(&self) -> usize {
        self.inner.state.lock().takers.len()
    }
}

impl Default for SyncChannel {
    fn default() -> Self {
        Self::new()
    }
}
