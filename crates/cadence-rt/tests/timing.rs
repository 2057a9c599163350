// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Ordering and timing of effects on the virtual clock.

use std::time::{Duration, Instant};

use cadence_rt::effects::{call, delay, parallel, race, race_labeled};
use cadence_rt::{Callable, Cx, Error, Interpreter, Outcome, Process, RuntimeConfig, Value};

fn interpreter() -> Interpreter {
    Interpreter::builder()
        .config(RuntimeConfig::virtual_clock())
        .build()
}

fn now(cx: &Cx) -> Value {
    Value::Int(cx.engine().now_ms() as i64)
}

async fn sequence(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    let mut seen = Vec::new();
    for (ms, tag) in [(30, "a"), (10, "b"), (20, "c")] {
        seen.push(cx.perform(delay(ms, tag)).await?);
    }
    seen.push(now(&cx));
    Ok(Value::List(seen))
}

#[test]
fn sequential_effects_resume_in_yield_order() {
    let rt = interpreter();
    let outcome = rt.run(&Process::new("sequence", sequence), vec![]).unwrap();
    assert_eq!(
        outcome,
        Outcome::Completed(Value::List(vec![
            "a".into(),
            "b".into(),
            "c".into(),
            Value::Int(60),
        ]))
    );
}

async fn gather(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    let values = cx
        .perform(parallel(vec![delay(10, "a"), delay(20, "b")]))
        .await?;
    Ok(Value::List(vec![values, now(&cx)]))
}

#[test]
fn parallel_waits_for_every_member() {
    let rt = interpreter();
    let outcome = rt.run(&Process::new("gather", gather), vec![]).unwrap();
    assert_eq!(
        outcome.value(),
        Some(&Value::List(vec![
            Value::List(vec!["a".into(), "b".into()]),
            Value::Int(20),
        ]))
    );
}

async fn first(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    let winner = cx.perform(race(vec![delay(10, "a"), delay(20, "b")])).await?;
    let won_at = now(&cx);
    // The losing delay fires at 20 while this one is pending.
    let after = cx.perform(delay(50, "after")).await?;
    Ok(Value::List(vec![winner, won_at, after, now(&cx)]))
}

#[test]
fn race_settles_with_the_first_member() {
    let rt = interpreter();
    let outcome = rt.run(&Process::new("first", first), vec![]).unwrap();
    assert_eq!(
        outcome.value(),
        Some(&Value::List(vec![
            "a".into(),
            Value::Int(10),
            "after".into(),
            Value::Int(60),
        ]))
    );
}

async fn labeled(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    cx.perform(race_labeled([
        ("response", delay(50, "late")),
        ("timeout", delay(20, ())),
    ]))
    .await
}

#[test]
fn labeled_race_reports_the_winning_label() {
    let rt = interpreter();
    let outcome = rt.run(&Process::new("labeled", labeled), vec![]).unwrap();
    assert_eq!(
        outcome,
        Outcome::Completed(Value::map([("timeout", Value::Unit)]))
    );
    assert_eq!(rt.now_ms(), 20);
}

async fn short_circuit(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    let boom = Callable::sync("boom", |_| Err(Error::msg("boom")));
    cx.perform(parallel(vec![delay(10, "a"), call(boom, vec![])]))
        .await
}

#[test]
fn parallel_fails_on_first_error() {
    let rt = interpreter();
    let outcome = rt
        .run(&Process::new("short-circuit", short_circuit), vec![])
        .unwrap();
    assert_eq!(outcome, Outcome::Failed(Error::msg("boom")));
    assert_eq!(rt.now_ms(), 0);
}

async fn empty(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    let all = cx.perform(parallel(vec![])).await?;
    let any = cx.perform(race(vec![])).await?;
    Ok(Value::List(vec![all, any]))
}

#[test]
fn empty_combinators_resolve_immediately() {
    let rt = interpreter();
    let outcome = rt.run(&Process::new("empty", empty), vec![]).unwrap();
    assert_eq!(
        outcome.value(),
        Some(&Value::List(vec![Value::List(vec![]), Value::Unit]))
    );
}

async fn plain(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    cx.perform(Value::from(7)).await
}

#[test]
fn plain_values_pass_through() {
    let rt = interpreter();
    let outcome = rt.run(&Process::new("plain", plain), vec![]).unwrap();
    assert_eq!(outcome, Outcome::Completed(Value::Int(7)));
}

async fn nap(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    cx.perform(delay(15, "rested")).await
}

#[test]
fn real_clock_waits_for_deadlines() {
    let rt = Interpreter::new();
    let started = Instant::now();
    let outcome = rt.run(&Process::new("nap", nap), vec![]).unwrap();
    assert_eq!(outcome, Outcome::Completed("rested".into()));
    // Deadlines are whole milliseconds on the runtime clock.
    assert!(started.elapsed() >= Duration::from_millis(14));
    assert!(rt.now_ms() >= 15);
}
