// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Channel buffers with pluggable eviction.
//!
//! A buffered channel only stores messages no taker is waiting for; what
//! happens once the buffer is full is the buffer's policy, not the channel's.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Storage behind a buffered channel.
pub trait Buffer: Send {
    fn put(&mut self, msg: Value);
    fn take(&mut self) -> Option<Value>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Discards everything. Messages only reach takers that are already waiting.
#[derive(Debug, Default)]
pub struct NoBuffer;

impl Buffer for NoBuffer {
    fn put(&mut self, _msg: Value) {}

    fn take(&mut self) -> Option<Value> {
        None
    }

    fn len(&self) -> usize {
        0
    }
}

/// Keeps the oldest `limit` messages; new ones are dropped once full.
#[derive(Debug)]
pub struct DroppingBuffer {
    items: VecDeque<Value>,
    limit: usize,
}

impl Buffer for DroppingBuffer {
    fn put(&mut self, msg: Value) {
        if self.items.len() < self.limit {
            self.items.push_back(msg);
        }
    }

    fn take(&mut self) -> Option<Value> {
        self.items.pop_front()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Keeps the newest `limit` messages; the oldest is evicted once full.
#[derive(Debug)]
pub struct SlidingBuffer {
    items: VecDeque<Value>,
    limit: usize,
}

impl Buffer for SlidingBuffer {
    fn put(&mut self, msg: Value) {
        if self.limit == 0 {
            return;
        }
        if self.items.len() == self.limit {
            self.items.pop_front();
        }
        self.items.push_back(msg);
    }

    fn take(&mut self) -> Option<Value> {
        self.items.pop_front()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Grows without bound.
#[derive(Debug, Default)]
pub struct UnboundedBuffer {
    items: VecDeque<Value>,
}

impl Buffer for UnboundedBuffer {
    fn put(&mut self, msg: Value) {
        self.items.push_back(msg);
    }

    fn take(&mut self) -> Option<Value> {
        self.items.pop_front()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

pub fn none() -> Box<dyn Buffer> {
    Box::new(NoBuffer)
}

pub fn dropping(limit: usize) -> Box<dyn Buffer> {
    Box::new(DroppingBuffer {
        items: VecDeque::with_capacity(limit.min(1024)),
        limit,
    })
}

pub fn sliding(limit: usize) -> Box<dyn Buffer> {
    Box::new(SlidingBuffer {
        items: VecDeque::with_capacity(limit.min(1024)),
        limit,
    })
}

pub fn unbounded() -> Box<dyn Buffer> {
    Box::new(UnboundedBuffer::default())
}

/// Serializable buffer selector, used by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BufferPolicy {
    None,
    Dropping { limit: usize },
    Sliding { limit: usize },
    Unbounded,
}

impl BufferPolicy {
    pub fn build(self) -> Box<dyn Buffer> {
        match self {
            BufferPolicy::None => none(),
            BufferPolicy::Dropping { limit } => dropping(limit),
            BufferPolicy::Sliding { limit } => sliding(limit),
            BufferPolicy::Unbounded => unbounded(),
        }
    }
}

impl Default for BufferPolicy {
    fn default() -> Self {
        BufferPolicy::Sliding { limit: 10 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(buf: &mut dyn Buffer) -> Vec<i64> {
        std::iter::from_fn(|| buf.take())
            .filter_map(|v| v.as_int())
            .collect()
    }

    #[test]
    fn sliding_evicts_oldest() {
        let mut buf = sliding(3);
        for i in 0..5 {
            buf.put(Value::Int(i));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(drain(buf.as_mut()), vec![2, 3, 4]);
    }

    #[test]
    fn dropping_keeps_oldest() {
        let mut buf = dropping(3);
        for i in 0..5 {
            buf.put(Value::Int(i));
        }
        assert_eq!(drain(buf.as_mut()), vec![0, 1, 2]);
    }

    #[test]
    fn none_never_stores() {
        let mut buf = none();
        buf.put(Value::Int(1));
        assert!(buf.is_empty());
        assert!(buf.take().is_none());
    }

    #[test]
    fn policy_from_json() {
        let p: BufferPolicy = serde_json::from_str(r#"{"policy":"sliding","limit":4}"#).unwrap();
        assert_eq!(p, BufferPolicy::Sliding { limit: 4 });
        let p: BufferPolicy = serde_json::from_str(r#"{"policy":"unbounded"}"#).unwrap();
        let mut buf = p.build();
        for i in 0..100 {
            buf.put(Value::Int(i));
        }
        assert_eq!(buf.len(), 100);
    }
}
