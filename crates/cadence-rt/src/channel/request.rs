// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Request/response channel.
//!
//! Requests are queued like a buffered channel and delivered as
//! `{id, body}` maps. Responses are correlated by request id, so each
//! requester only ever sees the response to its own request.

use std::collections::VecDeque;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{Subscription, Taker, Unsubscribe};
use crate::error::ChannelError;
use crate::value::Value;

/// Correlation id of one request.
pub type RequestId = String;

#[derive(Clone)]
pub struct RequestResponseChannel {
    inner: Arc<Inner>,
}

struct Inner {
    id: Uuid,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    requests: VecDeque<Value>,
    request_takers: VecDeque<Taker>,
    responses: IndexMap<RequestId, Value>,
    response_takers: IndexMap<RequestId, Taker>,
    closed: bool,
}

impl RequestResponseChannel {
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

    /// Queue a request. Returns its fresh id, or `None` once closed.
    pub fn put_request(&self, body: impl Into<Value>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        let request = Value::map([("id", Value::from(id.clone())), ("body", body.into())]);
        let taker = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return None;
            }
            match state.request_takers.pop_front() {
                Some(taker) => taker,
                None => {
                    state.requests.push_back(request);
                    return Some(id);
                }
            }
        };
        taker(request);
        Some(id)
    }

    pub fn take_request(&self, cb: impl FnOnce(Value) + Send + 'static) {
        let request = {
            let mut state = self.inner.state.lock();
            match state.requests.pop_front() {
                Some(request) => request,
                None if state.closed => Value::End,
                None => {
                    state.request_takers.push_back(Box::new(cb));
                    return;
                }
            }
        };
        cb(request);
    }

    /// Answer request `id`. Ignored once closed.
    pub fn put_response(&self, id: &str, response: impl Into<Value>) {
        let response = response.into();
        let taker = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            match state.response_takers.shift_remove(id) {
                Some(taker) => taker,
                None => {
                    state.responses.insert(id.to_string(), response);
                    return;
                }
            }
        };
        taker(response);
    }

    /// Wait for the response to request `id`.
    pub fn take_response(&self, id: &str, cb: impl FnOnce(Value) + Send + 'static) {
        let response = {
            let mut state = self.inner.state.lock();
            match state.responses.shift_remove(id) {
                Some(response) => response,
                None if state.closed => Value::End,
                None => {
                    let displaced = state.response_takers.insert(id.to_string(), Box::new(cb));
                    drop(state);
                    if let Some(displaced) = displaced {
                        tracing::warn!(request = id, "second response taker for one request");
                        displaced(Value::End);
                    }
                    return;
                }
            }
        };
        cb(response);
    }

    /// Close and deliver END to every waiting request and response taker.
    pub fn close(&self) {
        let (request_takers, response_takers) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            (
                std::mem::take(&mut state.request_takers),
                std::mem::take(&mut state.response_takers),
            )
        };
        for taker in request_takers {
            taker(Value::End);
        }
        for (_, taker) in response_takers {
            taker(Value::End);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.state.lock().requests.len()
    }
}

impl Default for RequestResponseChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle given to an external request source.
#[derive(Clone)]
pub struct RequestEmitter {
    chan: RequestResponseChannel,
    subscription: Arc<Subscription>,
    on_response: Arc<dyn Fn(Value, Value) + Send + Sync>,
}

impl RequestEmitter {
    /// Queue an inbound request and route its eventual response back to the
    /// source's response handler. Emitting END closes the channel.
    pub fn emit(&self, request: impl Into<Value>) {
        let request = request.into();
        if request.is_end() {
            if self.subscription.close() {
                self.chan.close();
            }
            return;
        }
        let Some(id) = self.chan.put_request(request.clone()) else {
            return;
        };
        let on_response = self.on_response.clone();
        self.chan
            .take_response(&id, move |response| on_response(request, response));
    }
}

/// Request/response channel fed by an external source of requests.
#[derive(Clone)]
pub struct RequestResponseSource {
    chan: RequestResponseChannel,
    subscription: Arc<Subscription>,
}

impl RequestResponseSource {
    pub fn new<F, H>(source: F, on_response: H) -> Result<Self, ChannelError>
    where
        F: FnOnce(RequestEmitter) -> Option<Unsubscribe>,
        H: Fn(Value, Value) + Send + Sync + 'static,
    {
        let chan = RequestResponseChannel::new();
        let subscription = Arc::new(Subscription::default());
        let emitter = RequestEmitter {
            chan: chan.clone(),
            subscription: subscription.clone(),
            on_response: Arc::new(on_response),
        };
        let unsubscribe = source(emitter).ok_or(ChannelError::MissingUnsubscribe)?;
        subscription.attach(unsubscribe);
        Ok(Self { chan, subscription })
    }

    pub fn id(&self) -> Uuid {
        self.chan.id()
    }

    pub fn take_request(&self, cb: impl FnOnce(Value) + Send + 'static) {
        self.chan.take_request(cb);
    }

    pub fn put_response(&self, id: &str, response: impl Into<Value>) {
        self.chan.put_response(id, response);
    }

    pub fn close(&self) {
        if self.subscription.close() {
            self.chan.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.subscription.is_closed()
    }
}
