// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The IO collaborator behind `take`, `put`, `select` and `action-channel`.
//!
//! Actions are map values with a string `type` field. [`PubSub`] is the
//! in-memory default: an ordered subscriber list, a state cell and glob
//! matching on the action type.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::Unsubscribe;
use crate::error::Error;
use crate::value::Value;

pub type Listener = Arc<dyn Fn(Value) + Send + Sync>;

/// Reducer applied to the state cell on every dispatch.
pub type Reducer = Arc<dyn Fn(&Value, &Value) -> Value + Send + Sync>;

pub trait Io: Send + Sync {
    /// Publish an action. Returns the dispatch result (the action itself by default).
    fn dispatch(&self, action: Value) -> Result<Value, Error>;

    /// Deliver every action whose type matches `pattern` to `listener`.
    fn subscribe(&self, pattern: &str, listener: Listener) -> Unsubscribe;

    fn get_state(&self) -> Value;
}

/// Glob match of an action type against a pattern.
///
/// Both are split on `/`. A `*` segment matches exactly one segment, and a
/// pattern that is just `*` matches every type.
pub fn type_matches(pattern: &str, ty: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let mut pat = pattern.split('/');
    let mut seg = ty.split('/');
    loop {
        match (pat.next(), seg.next()) {
            (None, None) => return true,
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            _ => return false,
        }
    }
}

/// Type string of an action (`None` for anything without a string `type`).
pub fn action_type(action: &Value) -> Option<&str> {
    action.get("type").and_then(Value::as_str)
}

struct Subscriber {
    id: u64,
    pattern: String,
    listener: Listener,
}

#[derive(Default)]
struct Inner {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    state: Mutex<Value>,
    reducer: Option<Reducer>,
}

#[derive(Clone, Default)]
pub struct PubSub {
    inner: Arc<Inner>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose state is folded from every dispatched action.
    pub fn with_reducer(
        initial: impl Into<Value>,
        reducer: impl Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(initial.into()),
                reducer: Some(Arc::new(reducer)),
                ..Inner::default()
            }),
        }
    }

    pub fn set_state(&self, state: impl Into<Value>) {
        *self.inner.state.lock() = state.into();
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl Io for PubSub {
    fn dispatch(&self, action: Value) -> Result<Value, Error> {
        let ty = action_type(&action)
            .ok_or_else(|| Error::malformed("put", "action has no string `type` field"))?
            .to_string();

        if let Some(reducer) = &self.inner.reducer {
            let mut state = self.inner.state.lock();
            let next = reducer(&state, &action);
            *state = next;
        }

        let listeners: Vec<Listener> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .filter(|s| type_matches(&s.pattern, &ty))
            .map(|s| s.listener.clone())
            .collect();
        tracing::trace!(action = %ty, listeners = listeners.len(), "dispatch");
        for listener in listeners {
            listener(action.clone());
        }
        Ok(action)
    }

    fn subscribe(&self, pattern: &str, listener: Listener) -> Unsubscribe {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().push(Subscriber {
            id,
            pattern: pattern.to_string(),
            listener,
        });
        let inner = Arc::downgrade(&self.inner);
        Box::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.subscribers.lock().retain(|s| s.id != id);
            }
        })
    }

    fn get_state(&self) -> Value {
        self.inner.state.lock().clone()
    }
}
