// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `parallel` and `race`.
//!
//! Members are resolved through the engine directly, without middleware.
//! Every member starts before any result is looked at. Losing or late
//! members keep running; their results are ignored.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::{mismatch, Builtin, Descriptor, Op, RaceSet, Resume};
use crate::engine::Engine;
use crate::error::Error;
use crate::io::Io;
use crate::task::Task;
use crate::value::Value;

pub(super) fn kinds() -> Vec<Builtin> {
    vec![
        Builtin::new("parallel", parallel),
        Builtin::new("race", race),
    ]
}

struct Gather {
    results: Vec<Option<Value>>,
    remaining: usize,
    resume: Option<Resume>,
}

fn parallel(effect: &Descriptor, _io: &dyn Io, engine: &Engine, task: &Task, resume: Resume) {
    let Op::Parallel(members) = effect.op() else {
        return mismatch(effect, "parallel", resume);
    };
    if members.is_empty() {
        return resume.ok(Value::List(Vec::new()));
    }

    let gather = Arc::new(Mutex::new(Gather {
        results: vec![None; members.len()],
        remaining: members.len(),
        resume: Some(resume),
    }));

    for (index, member) in members.iter().enumerate() {
        let gather = gather.clone();
        engine.resolve_descriptor(
            member.clone(),
            task,
            Box::new(move |result| {
                let settled = {
                    let mut g = gather.lock();
                    if g.resume.is_none() {
                        return;
                    }
                    match result {
                        Ok(value) => {
                            g.results[index] = Some(value);
                            g.remaining -= 1;
                            if g.remaining == 0 {
                                let values = g.results.drain(..).map(Option::unwrap_or_default).collect();
                                g.resume.take().map(|r| (r, Ok(Value::List(values))))
                            } else {
                                None
                            }
                        }
                        Err(error) => g.resume.take().map(|r| (r, Err(error))),
                    }
                };
                if let Some((resume, result)) = settled {
                    resume.settle(result);
                }
            }),
        );
    }
}

fn race(effect: &Descriptor, _io: &dyn Io, engine: &Engine, task: &Task, resume: Resume) {
    let Op::Race(set) = effect.op() else {
        return mismatch(effect, "race", resume);
    };
    let winner: Arc<Mutex<Option<Resume>>> = Arc::new(Mutex::new(Some(resume)));

    let members: Vec<(Option<String>, &Descriptor)> = match set {
        RaceSet::List(members) if members.is_empty() => {
            return settle_first(&winner, Ok(Value::Unit));
        }
        RaceSet::Labeled(members) if members.is_empty() => {
            return settle_first(&winner, Ok(Value::Map(IndexMap::new())));
        }
        RaceSet::List(members) => members.iter().map(|d| (None, d)).collect(),
        RaceSet::Labeled(members) => members
            .iter()
            .map(|(label, d)| (Some(label.clone()), d))
            .collect(),
    };

    for (label, member) in members {
        let winner = winner.clone();
        engine.resolve_descriptor(
            member.clone(),
            task,
            Box::new(move |result| {
                let result = match label {
                    Some(label) => result.map(|v| Value::Map(IndexMap::from([(label, v)]))),
                    None => result,
                };
                settle_first(&winner, result);
            }),
        );
    }
}

fn settle_first(winner: &Mutex<Option<Resume>>, result: Result<Value, Error>) {
    let resume = winner.lock().take();
    if let Some(resume) = resume {
        resume.settle(result);
    }
}
