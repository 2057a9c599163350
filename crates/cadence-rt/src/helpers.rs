// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Watcher processes built from the primitive effects.

use crate::effect::Descriptor;
use crate::effects;
use crate::error::Error;
use crate::process::{Cx, Process};
use crate::task::Task;
use crate::value::Value;

/// Fork a watcher that forks `worker` for every action matching `pattern`.
/// The worker receives `args` followed by the action.
pub fn take_every(pattern: &str, worker: &Process, args: Vec<Value>) -> Descriptor {
    let watcher = watcher("take-every", pattern, worker, args, false);
    effects::fork(&watcher, Vec::new())
}

/// Like [`take_every`], but a new action cancels the previous worker first.
pub fn take_latest(pattern: &str, worker: &Process, args: Vec<Value>) -> Descriptor {
    let watcher = watcher("take-latest", pattern, worker, args, true);
    effects::fork(&watcher, Vec::new())
}

fn watcher(kind: &str, pattern: &str, worker: &Process, args: Vec<Value>, latest: bool) -> Process {
    let pattern = pattern.to_string();
    let worker = worker.clone();
    let name = format!("{kind}({pattern})");
    Process::new(&name, move |cx, _| {
        watch(cx, pattern.clone(), worker.clone(), args.clone(), latest)
    })
}

async fn watch(
    cx: Cx,
    pattern: String,
    worker: Process,
    args: Vec<Value>,
    latest: bool,
) -> Result<Value, Error> {
    let mut last: Option<Task> = None;
    loop {
        let action = cx.perform(effects::take(pattern.as_str())).await?;
        if latest {
            if let Some(previous) = last.take() {
                cx.perform(effects::cancel(&previous)).await?;
            }
        }
        let mut worker_args = args.clone();
        worker_args.push(action);
        let forked = cx.perform(effects::fork(&worker, worker_args)).await?;
        last = forked.as_task().cloned();
    }
}
