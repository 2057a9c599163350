// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime values.
//!
//! Everything that flows through a yield point, a channel or a task result
//! is a `Value`. Live handles (tasks, channels, host data) are carried by
//! reference and only ever projected to ids when serialized.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::channel::{
    BufferedChannel, Chan, EventChannel, RequestResponseChannel, RequestResponseSource, SyncChannel,
};
use crate::error::Error;
use crate::task::Task;

/// A dynamically typed runtime value.
#[derive(Clone, Default)]
pub enum Value {
    /// Absence of a value (`null`).
    #[default]
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    /// Insertion-ordered map (labeled race results, context snapshots, actions).
    Map(IndexMap<String, Value>),
    /// Handle to a running or finished task.
    Task(Task),
    /// Handle to a channel.
    Channel(Chan),
    /// The END sentinel. Test with [`is_end_of_channel`].
    End,
    /// Host data the runtime passes through untouched.
    Opaque(Arc<dyn Any + Send + Sync>),
}

/// The only sanctioned way to test for the END sentinel.
pub fn is_end_of_channel(value: &Value) -> bool {
    matches!(value, Value::End)
}

impl Value {
    /// Build a map value from `(key, value)` pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Wrap arbitrary host data.
    pub fn opaque<T: Any + Send + Sync>(data: T) -> Self {
        Value::Opaque(Arc::new(data))
    }

    pub fn is_end(&self) -> bool {
        is_end_of_channel(self)
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(*n),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_task(&self) -> Option<&Task> {
        match self {
            Value::Task(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_channel(&self) -> Option<&Chan> {
        match self {
            Value::Channel(c) => Some(c),
            _ => None,
        }
    }

    /// Downcast opaque host data.
    pub fn downcast_opaque<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Opaque(data) => data.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Field lookup on a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Read plain data into a typed structure.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_value(self.to_json()).map_err(|e| Error::Deserialize(e.to_string()))
    }

    /// JSON-safe projection used by monitoring. Never includes live references.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Unit | Value::End => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Int(n) => json!(n),
            Value::Float(n) => json!(n),
            Value::String(s) => json!(s),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Task(t) => json!({ "task": t.id().to_string(), "name": t.name() }),
            Value::Channel(c) => json!({ "channel": c.id().to_string(), "kind": c.kind() }),
            Value::Opaque(_) => json!("<opaque>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "Unit"),
            Value::Bool(b) => write!(f, "{b:?}"),
            Value::Int(n) => write!(f, "{n:?}"),
            Value::Float(n) => write!(f, "{n:?}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Map(m) => f.debug_map().entries(m).finish(),
            Value::Task(t) => write!(f, "Task({} {})", t.name(), t.id()),
            Value::Channel(c) => write!(f, "Channel({} {})", c.kind(), c.id()),
            Value::End => write!(f, "END"),
            Value::Opaque(_) => write!(f, "Opaque"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) | (Value::End, Value::End) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Task(a), Value::Task(b)) => a.id() == b.id(),
            (Value::Channel(a), Value::Channel(b)) => a.id() == b.id(),
            (Value::Opaque(a), Value::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Unit
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(m: IndexMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

impl From<Task> for Value {
    fn from(t: Task) -> Self {
        Value::Task(t)
    }
}

impl From<Chan> for Value {
    fn from(c: Chan) -> Self {
        Value::Channel(c)
    }
}

impl From<BufferedChannel> for Value {
    fn from(c: BufferedChannel) -> Self {
        Value::Channel(Chan::Buffered(c))
    }
}

impl From<SyncChannel> for Value {
    fn from(c: SyncChannel) -> Self {
        Value::Channel(Chan::Sync(c))
    }
}

impl From<EventChannel> for Value {
    fn from(c: EventChannel) -> Self {
        Value::Channel(Chan::Event(c))
    }
}

impl From<RequestResponseChannel> for Value {
    fn from(c: RequestResponseChannel) -> Self {
        Value::Channel(Chan::RequestResponse(c))
    }
}

impl From<RequestResponseSource> for Value {
    fn from(c: RequestResponseSource) -> Self {
        Value::Channel(Chan::Source(c))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Unit)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Unit,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(m) => {
                Value::Map(m.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
