// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Dispatch, host calls, actors, context and monitoring.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use cadence_rt::effect::CpsCallback;
use cadence_rt::effects::{
    call, cancel, cps, delay, fork, get_global_context, get_local_context, join, parallel,
    receive, safe_call, send, set_global_context, set_local_context, spawn, take_channel,
};
use cadence_rt::io::Io;
use cadence_rt::{
    BufferedChannel, Callable, Cx, Descriptor, EffectKind, Engine, Error, Interpreter, Monitor,
    Op, Outcome, Process, Registry, Resume, RuntimeConfig, RuntimeError, Task, Value,
};

fn interpreter() -> Interpreter {
    Interpreter::builder()
        .config(RuntimeConfig::virtual_clock())
        .build()
}

fn as_task(value: &Value) -> Result<Task, Error> {
    value
        .as_task()
        .cloned()
        .ok_or_else(|| Error::msg("expected a task"))
}

// Dispatch

async fn wait_ten(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    cx.perform(delay(10, "done")).await
}

#[test]
fn single_delay_emits_lifecycle_in_order() {
    let (monitor, recorder) = Monitor::recorder();
    let rt = Interpreter::builder()
        .config(RuntimeConfig::virtual_clock())
        .monitor(monitor)
        .build();
    let outcome = rt.run(&Process::new("wait", wait_ten), vec![]).unwrap();
    assert_eq!(outcome, Outcome::Completed("done".into()));
    assert_eq!(
        recorder.kinds(),
        vec![
            "task-created",
            "effect-triggered",
            "effect-attached",
            "effect-resolved",
            "effect-detached",
            "task-completed",
            "task-terminated",
        ]
    );
}

async fn fork_and_cancel(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    let short = Process::new("short", wait_ten);
    let long = Process::new("long", |cx, _| async move { cx.perform(delay(100, ())).await });
    let a = as_task(&cx.perform(fork(&short, vec![])).await?)?;
    let b = as_task(&cx.perform(fork(&long, vec![])).await?)?;
    cx.perform(cancel(&b)).await?;
    cx.perform(join(&a)).await
}

#[test]
fn fork_lifecycle_is_counted() {
    let (monitor, recorder) = Monitor::recorder();
    let rt = Interpreter::builder()
        .config(RuntimeConfig::virtual_clock())
        .monitor(monitor)
        .build();
    let outcome = rt
        .run(&Process::new("parent", fork_and_cancel), vec![])
        .unwrap();
    assert!(outcome.is_completed());
    assert_eq!(recorder.count("task-created"), 3);
    assert_eq!(recorder.count("task-attached"), 2);
    assert_eq!(recorder.count("task-detached"), 2);
    assert_eq!(recorder.count("task-cancelled"), 1);
    assert_eq!(recorder.count("task-terminated"), 3);
}

#[test]
fn panicking_monitor_sink_is_contained() {
    let monitor = Monitor::new().with_sink(|_| panic!("sink"));
    let rt = Interpreter::builder()
        .config(RuntimeConfig::virtual_clock())
        .monitor(monitor)
        .build();
    let outcome = rt.run(&Process::new("wait", wait_ten), vec![]).unwrap();
    assert_eq!(outcome, Outcome::Completed("done".into()));
}

async fn nope(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    cx.perform(Descriptor::custom("nope", ())).await
}

#[test]
fn unknown_kinds_fail_the_yield() {
    let rt = interpreter();
    let outcome = rt.run(&Process::new("nope", nope), vec![]).unwrap();
    assert_eq!(outcome, Outcome::Failed(Error::UnknownEffect("nope".into())));

    let empty = Interpreter::builder()
        .config(RuntimeConfig::virtual_clock())
        .registry(Registry::new())
        .build();
    let outcome = empty.run(&Process::new("wait", wait_ten), vec![]).unwrap();
    assert_eq!(outcome, Outcome::Failed(Error::UnknownEffect("delay".into())));
}

/// Resumes with the descriptor's fields, doubled if they are an int.
struct Double;

impl EffectKind for Double {
    fn kind(&self) -> &str {
        "double"
    }

    fn resolve(&self, effect: &Descriptor, _io: &dyn Io, _engine: &Engine, _task: &Task, resume: Resume) {
        match effect.op() {
            Op::Custom { fields, .. } => match fields.as_int() {
                Some(n) => resume.ok(n * 2),
                None => resume.err(Error::malformed("double", "expected an int")),
            },
            _ => resume.err(Error::malformed("double", "not a custom descriptor")),
        }
    }
}

async fn doubled(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    let n = cx.perform(Descriptor::custom("double", 21)).await?;
    let bad = cx.perform(Descriptor::custom("double", "x")).await;
    Ok(Value::List(vec![n, Value::from(bad.is_err())]))
}

#[test]
fn custom_kinds_resolve_through_the_registry() {
    let rt = Interpreter::builder()
        .config(RuntimeConfig::virtual_clock())
        .registry(Registry::builtin().with(Double))
        .build();
    let outcome = rt.run(&Process::new("double", doubled), vec![]).unwrap();
    assert_eq!(
        outcome,
        Outcome::Completed(Value::List(vec![Value::Int(42), Value::Bool(true)]))
    );
}

// Middleware

fn stretch(
    f: impl Fn(u64) -> u64 + Send + Sync + 'static,
) -> impl Fn(Descriptor) -> Descriptor + Send + Sync + 'static {
    move |effect| {
        let op = match effect.op() {
            Op::Delay { ms, value } => Op::Delay {
                ms: f(*ms),
                value: value.clone(),
            },
            _ => return effect,
        };
        effect.with_op(op)
    }
}

async fn clocked(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    cx.perform(delay(10, ())).await?;
    let after_delay = cx.engine().now_ms() as i64;
    cx.perform(parallel(vec![delay(10, ())])).await?;
    let after_parallel = cx.engine().now_ms() as i64;
    Ok(Value::List(vec![
        Value::Int(after_delay),
        Value::Int(after_parallel),
    ]))
}

#[test]
fn middleware_applies_in_order_to_top_level_yields() {
    let rt = Interpreter::builder()
        .config(RuntimeConfig::virtual_clock())
        .middleware(stretch(|ms| ms + 5))
        .middleware(stretch(|ms| ms * 2))
        .build();
    let outcome = rt.run(&Process::new("clocked", clocked), vec![]).unwrap();
    assert_eq!(
        outcome,
        Outcome::Completed(Value::List(vec![Value::Int(30), Value::Int(40)]))
    );
}

#[test]
fn panicking_middleware_fails_the_yield() {
    let rt = Interpreter::builder()
        .config(RuntimeConfig::virtual_clock())
        .middleware(|_| panic!("bad transform"))
        .build();
    let outcome = rt.run(&Process::new("wait", wait_ten), vec![]).unwrap();
    assert_eq!(
        outcome,
        Outcome::Failed(Error::Panicked("bad transform".into()))
    );
}

// Host calls

fn divide() -> Callable {
    Callable::sync("divide", |args| {
        let a = args.first().and_then(Value::as_int).unwrap_or(0);
        match args.get(1).and_then(Value::as_int) {
            Some(0) | None => Err(Error::msg("division by zero")),
            Some(b) => Ok(Value::Int(a / b)),
        }
    })
}

async fn host_calls(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    let quotient = cx.perform(call(divide(), vec![84.into(), 2.into()])).await?;
    let failed = cx.perform(safe_call(divide(), vec![1.into(), 0.into()])).await?;
    let later = Callable::future("later", |args: Vec<Value>| async move {
        Ok::<_, Error>(Value::Int(args.len() as i64))
    });
    let counted = cx.perform(call(later, vec![().into(), ().into()])).await?;
    let boom = Callable::sync("boom", |_| panic!("kaboom"));
    let panicked = cx.perform(safe_call(boom, vec![])).await?;
    Ok(Value::List(vec![quotient, failed, counted, panicked]))
}

#[test]
fn host_functions_settle_their_yields() {
    let rt = interpreter();
    let outcome = rt.run(&Process::new("host", host_calls), vec![]).unwrap();
    assert_eq!(
        outcome,
        Outcome::Completed(Value::List(vec![
            Value::Int(42),
            Value::List(vec!["division by zero".into(), Value::Unit]),
            Value::Int(2),
            Value::List(vec!["panic: kaboom".into(), Value::Unit]),
        ]))
    );
}

async fn continuation(cx: Cx, parked: Arc<Mutex<Option<CpsCallback>>>) -> Result<Value, Error> {
    let sum = cx
        .perform(cps(
            |args, _task, done| {
                let total = args.iter().filter_map(Value::as_int).sum::<i64>();
                done(Ok(Value::Int(total)));
            },
            vec![1.into(), 2.into(), 3.into()],
        ))
        .await?;
    let deferred = cx
        .perform(cps(
            move |_args, _task, done| {
                *parked.lock() = Some(done);
            },
            vec![],
        ))
        .await?;
    Ok(Value::List(vec![sum, deferred]))
}

#[test]
fn cps_callbacks_may_fire_later() {
    let parked: Arc<Mutex<Option<CpsCallback>>> = Arc::default();
    let rt = interpreter();
    let root = {
        let parked = parked.clone();
        Process::new("cps", move |cx, _| continuation(cx, parked.clone()))
    };
    let task = rt.spawn(&root, vec![]);
    rt.run_until_idle();
    assert!(task.is_running());

    let done = parked.lock().take().unwrap();
    done(Ok("late".into()));
    let outcome = rt.block_on(&task).unwrap();
    assert_eq!(
        outcome,
        Outcome::Completed(Value::List(vec![Value::Int(6), "late".into()]))
    );
}

// Actors

async fn echo(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    let mut served: i64 = 0;
    loop {
        let envelope = cx.perform(receive()).await?;
        let (message, sender) = match envelope.as_list() {
            Some([message, sender]) => (message.clone(), as_task(sender)?),
            _ => return Err(Error::msg("bad envelope")),
        };
        if message.as_str() == Some("stop") {
            return Ok(Value::Int(served));
        }
        served += 1;
        let n = message.as_int().unwrap_or(0);
        cx.perform(send(&sender, n * 2)).await?;
    }
}

async fn ask(cx: Cx, echo: Process) -> Result<Value, Error> {
    let actor = as_task(&cx.perform(spawn(&echo, vec![])).await?)?;
    cx.perform(send(&actor, 21)).await?;
    let reply = cx.perform(receive()).await?;
    cx.perform(send(&actor, "stop")).await?;
    let served = cx.perform(join(&actor)).await?;
    let from_actor = reply
        .as_list()
        .and_then(|r| r.get(1))
        .and_then(Value::as_task)
        .is_some_and(|t| t.id() == actor.id());
    Ok(Value::List(vec![
        reply.as_list().and_then(|r| r.first()).cloned().unwrap_or_default(),
        served,
        Value::from(from_actor),
    ]))
}

#[test]
fn mailboxes_carry_the_sender() {
    let rt = interpreter();
    let echo = Process::new("echo", echo);
    let root = Process::new("ask", move |cx, _| ask(cx, echo.clone()));
    let outcome = rt.run(&root, vec![]).unwrap();
    assert_eq!(
        outcome,
        Outcome::Completed(Value::List(vec![
            Value::Int(42),
            Value::Int(1),
            Value::Bool(true),
        ]))
    );
}

// Context

async fn read_context(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    let local = cx.perform(get_local_context()).await?;
    cx.perform(set_local_context([("user", "bob")])).await?;
    let global = cx.perform(get_global_context()).await?;
    Ok(Value::List(vec![
        local.get("user").cloned().unwrap_or_default(),
        global.get("env").cloned().unwrap_or_default(),
    ]))
}

async fn scoped(cx: Cx, child: Process) -> Result<Value, Error> {
    cx.perform(set_local_context([("user", "ada")])).await?;
    cx.perform(set_global_context([("env", "test")])).await?;
    let task = as_task(&cx.perform(fork(&child, vec![])).await?)?;
    let seen = cx.perform(join(&task)).await?;
    let local = cx.perform(get_local_context()).await?;
    Ok(Value::List(vec![
        seen,
        local.get("user").cloned().unwrap_or_default(),
    ]))
}

#[test]
fn local_context_is_inherited_not_shared() {
    let rt = interpreter();
    let child = Process::new("child", read_context);
    let root = Process::new("scoped", move |cx, _| scoped(cx, child.clone()));
    let outcome = rt.run(&root, vec![]).unwrap();
    assert_eq!(
        outcome,
        Outcome::Completed(Value::List(vec![
            Value::List(vec!["ada".into(), "test".into()]),
            "ada".into(),
        ]))
    );
    assert_eq!(
        rt.engine().global_context().get("env"),
        Some(Value::from("test"))
    );
}

// Executor

async fn wait_forever(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    cx.perform(take_channel(BufferedChannel::new())).await
}

#[test]
fn nothing_left_to_run_is_a_stall() {
    let rt = interpreter();
    let result = rt.run(&Process::new("stuck", wait_forever), vec![]);
    assert!(matches!(result, Err(RuntimeError::Stalled { pending: 1 })));
}

async fn wait_for_remote(cx: Cx, ch: BufferedChannel) -> Result<Value, Error> {
    cx.perform(take_channel(ch)).await
}

#[test]
fn remote_handles_feed_the_executor_from_other_threads() {
    let rt = Interpreter::new();
    let ch = BufferedChannel::new();
    let remote = rt.remote();
    let feeder = {
        let ch = ch.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            remote.submit(move || ch.put(Value::Int(7)));
        })
    };
    let root = Process::new("remote", move |cx, _| wait_for_remote(cx, ch.clone()));
    let outcome = rt.run(&root, vec![]).unwrap();
    feeder.join().unwrap();
    assert_eq!(outcome, Outcome::Completed(Value::Int(7)));
}
