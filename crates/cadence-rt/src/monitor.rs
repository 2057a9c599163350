// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Lifecycle monitoring.
//!
//! Every effect and task transition can be reported to a list of sinks as a
//! [`MonitorEvent`]. Events only carry JSON projections, never live handles.
//! Sinks run outside every runtime lock and a panicking sink is caught, so
//! monitoring cannot change what the scheduler does.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::panic_message;

/// Serializable identity of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MonitorEvent {
    EffectTriggered {
        effect: Json,
        task: TaskInfo,
        timestamp: u64,
    },
    EffectResolved {
        effect: Json,
        result: Json,
        timestamp: u64,
    },
    EffectRejected {
        effect: Json,
        reason: String,
        timestamp: u64,
    },
    EffectAttached {
        effect: Json,
        task: TaskInfo,
        timestamp: u64,
    },
    EffectDetached {
        effect: Json,
        task: TaskInfo,
        timestamp: u64,
    },
    TaskCreated {
        task: TaskInfo,
        parent: Option<TaskInfo>,
        timestamp: u64,
    },
    TaskCompleted {
        task: TaskInfo,
        error: Option<String>,
        result: Json,
        timestamp: u64,
    },
    TaskTerminated {
        task: TaskInfo,
        outcome: String,
        timestamp: u64,
    },
    TaskCancelled {
        task: TaskInfo,
        timestamp: u64,
    },
    TaskAttached {
        parent: TaskInfo,
        task: TaskInfo,
        timestamp: u64,
    },
    TaskDetached {
        parent: TaskInfo,
        task: TaskInfo,
        timestamp: u64,
    },
}

impl MonitorEvent {
    /// The `type` tag this event serializes with.
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorEvent::EffectTriggered { .. } => "effect-triggered",
            MonitorEvent::EffectResolved { .. } => "effect-resolved",
            MonitorEvent::EffectRejected { .. } => "effect-rejected",
            MonitorEvent::EffectAttached { .. } => "effect-attached",
            MonitorEvent::EffectDetached { .. } => "effect-detached",
            MonitorEvent::TaskCreated { .. } => "task-created",
            MonitorEvent::TaskCompleted { .. } => "task-completed",
            MonitorEvent::TaskTerminated { .. } => "task-terminated",
            MonitorEvent::TaskCancelled { .. } => "task-cancelled",
            MonitorEvent::TaskAttached { .. } => "task-attached",
            MonitorEvent::TaskDetached { .. } => "task-detached",
        }
    }
}

pub type Sink = Arc<dyn Fn(&MonitorEvent) + Send + Sync>;

/// Ordered list of event sinks. Empty by default, in which case events are
/// never even built.
#[derive(Clone, Default)]
pub struct Monitor {
    sinks: Vec<Sink>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl Fn(&MonitorEvent) + Send + Sync + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Sink that writes every event to `tracing` at trace level.
    pub fn with_tracing(self) -> Self {
        self.with_sink(|event| {
            let json = serde_json::to_string(event).unwrap_or_default();
            tracing::trace!(target: "cadence::monitor", event = event.kind(), "{json}");
        })
    }

    /// Monitor plus a shared log of everything it receives.
    pub fn recorder() -> (Self, Recorder) {
        let recorder = Recorder::default();
        let events = recorder.events.clone();
        let monitor = Self::new().with_sink(move |event| events.lock().push(event.clone()));
        (monitor, recorder)
    }

    pub fn is_enabled(&self) -> bool {
        !self.sinks.is_empty()
    }

    pub fn emit(&self, event: MonitorEvent) {
        for sink in &self.sinks {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| sink(&event))) {
                tracing::warn!(
                    event = event.kind(),
                    panic = %panic_message(payload),
                    "monitor sink panicked"
                );
            }
        }
    }
}

/// Event log filled by [`Monitor::recorder`].
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<MonitorEvent>>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<MonitorEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(MonitorEvent::kind).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}
