// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Fork, spawn, join and cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use cadence_rt::effects::{
    call_proc, cancel, cancelled, delay, fork, join, put_channel, self_task, spawn, take_channel,
};
use cadence_rt::{
    BufferedChannel, Chan, Cx, Error, Interpreter, Outcome, Process, RuntimeConfig, Task, Value,
};

type Seen = Arc<Mutex<Vec<Value>>>;

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

async fn sleeper(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    loop {
        cx.perform(delay(1000, ())).await?;
    }
}

async fn slow_child(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    cx.perform(delay(50, "child")).await
}

async fn failing(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    cx.perform(delay(10, ())).await?;
    Err(Error::msg("bad"))
}

async fn canceller(cx: Cx, args: Vec<Value>) -> Result<Value, Error> {
    let target = as_task(&args[0])?;
    cx.perform(delay(10, ())).await?;
    cx.perform(cancel(&target)).await
}

// Termination gating

async fn forks_and_returns(cx: Cx, child: Process) -> Result<Value, Error> {
    cx.perform(fork(&child, vec![])).await?;
    Ok("parent".into())
}

async fn observe(cx: Cx, args: Vec<Value>) -> Result<Value, Error> {
    let target = as_task(&args[0])?;
    cx.perform(delay(10, ())).await?;
    Ok(Value::List(vec![
        target.is_completed().into(),
        target.is_terminated().into(),
        Value::Int(target.attached_forks().len() as i64),
    ]))
}

#[test]
fn attached_fork_gates_termination() {
    let rt = interpreter();
    let child = Process::new("slow-child", slow_child);
    let parent = Process::new("parent", move |cx, _| forks_and_returns(cx, child.clone()));

    let parent = rt.spawn(&parent, vec![]);
    let observer = rt.spawn(&Process::new("observer", observe), vec![parent.clone().into()]);

    let seen = rt.block_on(&observer).unwrap();
    assert_eq!(
        seen.value(),
        Some(&Value::List(vec![true.into(), false.into(), Value::Int(1)]))
    );

    assert_eq!(
        rt.block_on(&parent).unwrap(),
        Outcome::Completed("parent".into())
    );
    assert_eq!(rt.now_ms(), 50);
    assert!(parent.attached_forks().is_empty());
}

// Cancellation cascade

async fn middle(cx: Cx, sleeper: Process, seen: Seen) -> Result<Value, Error> {
    let forked = cx.perform(fork(&sleeper, vec![])).await?;
    let spawned = cx.perform(spawn(&sleeper, vec![])).await?;
    seen.lock().extend([forked, spawned]);
    loop {
        cx.perform(delay(1000, ())).await?;
    }
}

async fn top(cx: Cx, middle: Process, seen: Seen) -> Result<Value, Error> {
    let forked = cx.perform(fork(&middle, vec![])).await?;
    cx.perform(delay(10, ())).await?;
    cx.perform(cancel(&as_task(&forked)?)).await?;
    seen.lock().insert(0, forked);
    Ok(Value::Unit)
}

#[test]
fn cancel_cascades_through_forks_but_not_spawns() {
    let rt = interpreter();
    let seen: Seen = Arc::default();
    let sleeper = Process::new("sleeper", sleeper);
    let middle = {
        let seen = seen.clone();
        Process::new("middle", move |cx, _| middle(cx, sleeper.clone(), seen.clone()))
    };
    let root = {
        let seen = seen.clone();
        Process::new("top", move |cx, _| top(cx, middle.clone(), seen.clone()))
    };

    assert_eq!(rt.run(&root, vec![]).unwrap(), Outcome::Completed(Value::Unit));
    assert_eq!(rt.now_ms(), 10);

    let tasks: Vec<Task> = seen.lock().iter().filter_map(Value::as_task).cloned().collect();
    let [middle, forked, spawned] = tasks.as_slice() else {
        panic!("expected three tasks, got {}", tasks.len());
    };
    assert!(middle.is_cancelled() && middle.is_terminated());
    assert!(forked.is_cancelled() && forked.is_terminated());
    assert!(!spawned.is_cancelled());
    assert!(spawned.is_running());
    assert_eq!(forked.outcome(), Some(Outcome::Cancelled));
}

// Cleanup after cancellation

async fn drain(cx: &Cx, channel: BufferedChannel) -> Result<Value, Error> {
    loop {
        cx.perform(take_channel(channel.clone())).await?;
    }
}

async fn looper(cx: Cx, args: Vec<Value>, observed: Arc<Mutex<Option<bool>>>) -> Result<Value, Error> {
    let Some(Value::Channel(Chan::Buffered(channel))) = args.first().cloned() else {
        return Err(Error::msg("expected a buffered channel"));
    };
    let result = drain(&cx, channel).await;
    let was_cancelled = cx.perform(cancelled()).await?;
    *observed.lock() = was_cancelled.as_bool();
    result
}

async fn quick(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    cx.perform(delay(5, "sibling")).await
}

async fn scenario(
    cx: Cx,
    looper: Process,
    quick: Process,
    joined: Arc<Mutex<Option<Value>>>,
) -> Result<Value, Error> {
    let channel = BufferedChannel::new();
    cx.perform(fork(&looper, vec![channel.clone().into()])).await?;
    cx.perform(put_channel(channel, 1)).await?;
    let sibling = cx.perform(fork(&quick, vec![])).await?;
    let value = cx.perform(join(&as_task(&sibling)?)).await?;
    *joined.lock() = Some(value);
    let me = cx.perform(self_task()).await?;
    cx.perform(cancel(&as_task(&me)?)).await?;
    Ok("not cancelled".into())
}

#[test]
fn forever_fork_observes_cancellation_in_cleanup() {
    let rt = interpreter();
    let observed = Arc::new(Mutex::new(None));
    let joined = Arc::new(Mutex::new(None));
    let looper = {
        let observed = observed.clone();
        Process::new("looper", move |cx, args| looper(cx, args, observed.clone()))
    };
    let quick = Process::new("quick", quick);
    let root = {
        let joined = joined.clone();
        Process::new("root", move |cx, _| {
            scenario(cx, looper.clone(), quick.clone(), joined.clone())
        })
    };

    let outcome = rt.run(&root, vec![]).unwrap();
    assert_eq!(outcome, Outcome::Cancelled);
    assert_eq!(*joined.lock(), Some(Value::from("sibling")));
    assert_eq!(*observed.lock(), Some(true));
}

async fn tidy(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    let value = cx.perform(delay(1, "ok")).await;
    let was_cancelled = cx.perform(cancelled()).await?;
    Ok(Value::List(vec![value?, was_cancelled]))
}

#[test]
fn cleanup_after_normal_completion_sees_not_cancelled() {
    let rt = interpreter();
    let outcome = rt.run(&Process::new("tidy", tidy), vec![]).unwrap();
    assert_eq!(
        outcome.value(),
        Some(&Value::List(vec!["ok".into(), false.into()]))
    );
}

// Stale callbacks

async fn victim(cx: Cx, record: Seen) -> Result<Value, Error> {
    let first = cx.perform(delay(50, "late")).await;
    let cleanup = cx.perform(delay(100, "cleanup")).await?;
    let mut record = record.lock();
    record.push(Value::from(first.err().map(|e| e.to_string())));
    record.push(cleanup);
    record.push(Value::Int(cx.engine().now_ms() as i64));
    Ok(Value::Unit)
}

#[test]
fn late_result_never_resumes_a_cancelled_task() {
    let rt = interpreter();
    let record: Seen = Arc::default();
    let victim = {
        let record = record.clone();
        Process::new("victim", move |cx, _| victim(cx, record.clone()))
    };
    let victim = rt.spawn(&victim, vec![]);
    rt.spawn(&Process::new("canceller", canceller), vec![victim.clone().into()]);

    assert_eq!(rt.block_on(&victim).unwrap(), Outcome::Cancelled);
    assert_eq!(
        *record.lock(),
        vec![
            Value::from("task was cancelled"),
            Value::from("cleanup"),
            Value::Int(110),
        ]
    );
    assert!(victim.attached_effects().is_empty());
    assert_eq!(victim.result(), None);
}

// Join

async fn joiner(cx: Cx, child: Process, canceller: Process) -> Result<Value, Error> {
    let child = as_task(&cx.perform(fork(&child, vec![])).await?)?;
    cx.perform(fork(&canceller, vec![child.clone().into()])).await?;
    cx.perform(join(&child)).await?;
    Ok("joined".into())
}

#[test]
fn joining_a_cancelled_task_cancels_the_caller() {
    let rt = interpreter();
    let child = Process::new("sleeper", sleeper);
    let canceller = Process::new("canceller", canceller);
    let root = Process::new("joiner", move |cx, _| {
        joiner(cx, child.clone(), canceller.clone())
    });
    let task = rt.spawn(&root, vec![]);
    assert_eq!(rt.block_on(&task).unwrap(), Outcome::Cancelled);
    assert!(task.is_cancelled());
    assert_eq!(rt.now_ms(), 10);
}

async fn catcher(cx: Cx, failing: Process) -> Result<Value, Error> {
    let child = as_task(&cx.perform(fork(&failing, vec![])).await?)?;
    match cx.perform(join(&child)).await {
        Ok(_) => Ok("no error".into()),
        Err(e) => Ok(e.to_string().into()),
    }
}

#[test]
fn join_rethrows_the_child_error() {
    let rt = interpreter();
    let failing = Process::new("failing", failing);
    let root = Process::new("catcher", move |cx, _| catcher(cx, failing.clone()));
    assert_eq!(rt.run(&root, vec![]).unwrap(), Outcome::Completed("bad".into()));
}

async fn doomed(cx: Cx, sleeper: Process, seen: Seen) -> Result<Value, Error> {
    let forked = cx.perform(fork(&sleeper, vec![])).await?;
    seen.lock().push(forked);
    Err(Error::msg("boom"))
}

#[test]
fn uncaught_error_cancels_forks() {
    let rt = interpreter();
    let seen: Seen = Arc::default();
    let sleeper = Process::new("sleeper", sleeper);
    let root = {
        let seen = seen.clone();
        Process::new("doomed", move |cx, _| doomed(cx, sleeper.clone(), seen.clone()))
    };
    assert_eq!(
        rt.run(&root, vec![]).unwrap(),
        Outcome::Failed(Error::msg("boom"))
    );
    let fork = as_task(&seen.lock()[0]).unwrap();
    assert!(fork.is_cancelled());
    assert!(fork.is_terminated());
    assert_eq!(rt.now_ms(), 0);
}

// Spawn

async fn launcher(cx: Cx, failing: Process) -> Result<Value, Error> {
    let spawned = cx.perform(spawn(&failing, vec![])).await?;
    cx.perform(delay(20, ())).await?;
    Ok(spawned)
}

#[test]
fn spawned_failures_stay_isolated() {
    let rt = interpreter();
    let failing = Process::new("failing", failing);
    let root = Process::new("launcher", move |cx, _| launcher(cx, failing.clone()));
    let outcome = rt.run(&root, vec![]).unwrap();
    let spawned = outcome.value().and_then(Value::as_task).cloned().unwrap();
    assert!(outcome.is_completed());
    assert_eq!(spawned.outcome(), Some(Outcome::Failed(Error::msg("bad"))));
}

#[test]
fn task_cancelled_before_first_poll_never_runs() {
    let rt = interpreter();
    let ran = Arc::new(AtomicBool::new(false));
    let body = {
        let ran = ran.clone();
        Process::new("never", move |_cx, _| {
            let ran = ran.clone();
            async move {
                ran.store(true, Ordering::SeqCst);
                Ok::<_, Error>(Value::Unit)
            }
        })
    };
    let task = rt.spawn(&body, vec![]);
    task.cancel();

    assert_eq!(rt.block_on(&task).unwrap(), Outcome::Cancelled);
    assert!(!ran.load(Ordering::SeqCst));
}

async fn guarded(cx: Cx, record: Seen) -> Result<Value, Error> {
    record.lock().push("started".into());
    let first = cx.perform(delay(100, ())).await;
    let was_cancelled = cx.perform(cancelled()).await?;
    let mut record = record.lock();
    record.push(Value::from(first.err().map(|e| e.to_string())));
    record.push(was_cancelled);
    Ok(Value::Unit)
}

async fn fork_then_cancel(cx: Cx, child: Process) -> Result<Value, Error> {
    let forked = cx.perform(fork(&child, vec![])).await?;
    cx.perform(cancel(&as_task(&forked)?)).await?;
    Ok(forked)
}

#[test]
fn fork_cancelled_immediately_still_runs_to_its_first_yield() {
    let rt = interpreter();
    let record: Seen = Arc::default();
    let child = {
        let record = record.clone();
        Process::new("guarded", move |cx, _| guarded(cx, record.clone()))
    };
    let root = Process::new("root", move |cx, _| fork_then_cancel(cx, child.clone()));

    let outcome = rt.run(&root, vec![]).unwrap();
    let forked = outcome.value().and_then(Value::as_task).cloned().unwrap();
    assert_eq!(forked.outcome(), Some(Outcome::Cancelled));
    assert_eq!(
        *record.lock(),
        vec![
            Value::from("started"),
            Value::from("task was cancelled"),
            Value::from(true),
        ]
    );
    assert_eq!(rt.now_ms(), 0);
}

async fn immediate(_cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    Ok(Value::Int(3))
}

#[test]
fn call_proc_of_a_body_that_never_yields() {
    let rt = interpreter();
    let child = Process::new("immediate", immediate);
    let root = Process::new("root", move |cx, _| {
        let child = child.clone();
        async move { cx.perform(call_proc(&child, vec![])).await }
    });
    assert_eq!(rt.run(&root, vec![]).unwrap(), Outcome::Completed(Value::Int(3)));
}

// Nested processes

async fn double(cx: Cx, args: Vec<Value>) -> Result<Value, Error> {
    let n = args.first().and_then(Value::as_int).unwrap_or(0);
    cx.perform(delay(5, ())).await?;
    Ok(Value::Int(n * 2))
}

async fn outer(cx: Cx, double: Process, failing: Process) -> Result<Value, Error> {
    let doubled = cx.perform(call_proc(&double, vec![Value::Int(21)])).await?;
    let failed = cx.perform(call_proc(&failing, vec![])).await;
    Ok(Value::List(vec![
        doubled,
        failed.err().map(|e| e.to_string()).into(),
    ]))
}

#[test]
fn call_proc_blocks_on_the_nested_process() {
    let rt = interpreter();
    let double = Process::new("double", double);
    let failing = Process::new("failing", failing);
    let root = Process::new("outer", move |cx, _| {
        outer(cx, double.clone(), failing.clone())
    });
    let outcome = rt.run(&root, vec![]).unwrap();
    assert_eq!(
        outcome.value(),
        Some(&Value::List(vec![Value::Int(42), "bad".into()]))
    );
    assert_eq!(rt.now_ms(), 15);
}

async fn whoami(cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    let me = cx.perform(self_task()).await?;
    Ok((as_task(&me)?.id() == cx.task().id()).into())
}

#[test]
fn self_effect_returns_the_calling_task() {
    let rt = interpreter();
    let outcome = rt.run(&Process::new("whoami", whoami), vec![]).unwrap();
    assert_eq!(outcome, Outcome::Completed(true.into()));
}

async fn explode(_cx: Cx, _args: Vec<Value>) -> Result<Value, Error> {
    panic!("kaboom")
}

#[test]
fn panicking_body_fails_the_task() {
    let rt = interpreter();
    let outcome = rt.run(&Process::new("explode", explode), vec![]).unwrap();
    assert_eq!(outcome, Outcome::Failed(Error::Panicked("kaboom".into())));
}

#[test]
fn on_complete_after_termination_runs_immediately() {
    let rt = interpreter();
    let task = rt.spawn(&Process::new("quick", quick), vec![]);
    rt.block_on(&task).unwrap();
    let hit = Arc::new(AtomicBool::new(false));
    let h = hit.clone();
    task.on_complete(move |outcome| h.store(outcome.is_completed(), Ordering::SeqCst));
    assert!(hit.load(Ordering::SeqCst));
}
