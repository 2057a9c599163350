// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task contexts.
//!
//! Each task owns a local context whose parent is the context of the task
//! that created it. Reads walk up the chain; writes never leave the local
//! layer, so a child can shadow but never modify what its parent sees.
//! The global context is one flat map shared by every task.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::value::Value;

/// Hierarchical per-task context.
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<Layer>,
}

#[derive(Default)]
struct Layer {
    parent: Option<Context>,
    local: Mutex<IndexMap<String, Value>>,
}

impl Context {
    /// Root context with no parent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh layer whose lookups fall through to `self`.
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Layer {
                parent: Some(self.clone()),
                local: Mutex::new(IndexMap::new()),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut layer = Some(self);
        while let Some(ctx) = layer {
            if let Some(v) = ctx.inner.local.lock().get(key) {
                return Some(v.clone());
            }
            layer = ctx.inner.parent.as_ref();
        }
        None
    }

    /// Write to the local layer only.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.local.lock().insert(key.into(), value.into());
    }

    pub fn parent(&self) -> Option<&Context> {
        self.inner.parent.as_ref()
    }

    /// Merged view: ancestors first, nearer layers override.
    pub fn snapshot(&self) -> IndexMap<String, Value> {
        let mut out = match &self.inner.parent {
            Some(parent) => parent.snapshot(),
            None => IndexMap::new(),
        };
        for (k, v) in self.inner.local.lock().iter() {
            out.insert(k.clone(), v.clone());
        }
        out
    }
}

/// Flat context shared by every task of one interpreter. Last write wins.
#[derive(Clone, Default)]
pub struct GlobalContext {
    inner: Arc<Mutex<IndexMap<String, Value>>>,
}

impl GlobalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.lock().insert(key.into(), value.into());
    }

    pub fn snapshot(&self) -> IndexMap<String, Value> {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_reads_through_to_parent() {
        let root = Context::new();
        root.set("user", "ada");
        let child = root.child();
        assert_eq!(child.get("user"), Some(Value::from("ada")));
        assert_eq!(child.get("missing"), None);
    }

    #[test]
    fn child_writes_shadow_without_leaking() {
        let root = Context::new();
        root.set("level", 1);
        let child = root.child();
        child.set("level", 2);
        assert_eq!(child.get("level"), Some(Value::Int(2)));
        assert_eq!(root.get("level"), Some(Value::Int(1)));
    }

    #[test]
    fn parent_writes_after_fork_are_visible() {
        let root = Context::new();
        let child = root.child();
        root.set("late", true);
        assert_eq!(child.get("late"), Some(Value::Bool(true)));
    }

    #[test]
    fn snapshot_merges_layers() {
        let root = Context::new();
        root.set("a", 1);
        root.set("b", 1);
        let child = root.child();
        child.set("b", 2);
        child.set("c", 3);
        let snap = child.snapshot();
        assert_eq!(snap.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(snap["b"], Value::Int(2));
    }

    #[test]
    fn global_is_shared() {
        let g = GlobalContext::new();
        let other = g.clone();
        g.set("k", 1);
        other.set("k", 2);
        assert_eq!(g.get("k"), Some(Value::Int(2)));
    }
}
