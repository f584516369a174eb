//! Aggregate wait primitives built on task continuations and actions.
//!
//! `delay`, `yield_now`, and `wait_while` schedule a helper action on a
//! stream and resolve their task from it. `when_all` and `when_any` are
//! pure continuation counters — once every constituent supports completion
//! callbacks, no per-tick polling is needed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::action::Flow;
use crate::cancel::CancelToken;
use crate::error::{Error, ErrorKind};
use crate::runtime::Runtime;
use crate::stream::ExecutionStream;
use crate::task::{Task, TaskStatus};
use crate::Result;

/// Returns a task that succeeds once `seconds` of tick time have elapsed
/// on `stream`.
///
/// Releasing `token` before expiry cancels both the underlying timer and
/// the task, synchronously within the release.
pub fn delay(stream: &ExecutionStream, seconds: f64, token: &CancelToken) -> Result<Task<()>> {
    let (source, task) = stream.runtime().tasks.acquire::<()>();
    let complete = source.clone();
    stream.add_timer(
        seconds,
        move || {
            let _ = complete.set_result(());
        },
        token.clone(),
    )?;
    token.register(move || source.try_cancel());
    Ok(task)
}

/// Returns a task that succeeds on the stream's next tick.
pub fn yield_now(stream: &ExecutionStream) -> Result<Task<()>> {
    let (source, task) = stream.runtime().tasks.acquire::<()>();
    stream.add_once(
        move || {
            let _ = source.set_result(());
        },
        CancelToken::none(),
        0,
    )?;
    Ok(task)
}

/// Returns a task that succeeds on the first tick `predicate` evaluates
/// false. While the predicate holds, the task stays pending; no work other
/// than the per-tick poll is done.
///
/// Releasing `token` cancels the poll and the task.
pub fn wait_while(
    stream: &ExecutionStream,
    predicate: impl FnMut() -> bool + Send + 'static,
    token: &CancelToken,
) -> Result<Task<()>> {
    let (source, task) = stream.runtime().tasks.acquire::<()>();
    let handle = stream.add_conditional(
        predicate,
        |_dt, _cx| Flow::next(),
        token.clone(),
        0,
    )?;
    let watched = handle.clone();
    handle.on_dispose(move || {
        if watched.is_cancelled() {
            source.try_cancel();
        } else {
            let _ = source.set_result(());
        }
    });
    Ok(task)
}

/// Returns a task that completes once every task in `tasks` has completed.
///
/// The aggregate status is the worst of the constituents
/// (`Succeeded < Canceled < Faulted`); for a faulted aggregate the first
/// observed error is carried. An empty slice completes immediately.
pub fn when_all(runtime: &Runtime, tasks: &[Task<()>]) -> Result<Task<()>> {
    let (source, task) = runtime.task_source::<()>();
    if tasks.is_empty() {
        source.set_result(())?;
        return Ok(task);
    }

    let remaining = Arc::new(AtomicUsize::new(tasks.len()));
    let worst: Arc<Mutex<(TaskStatus, Option<Error>)>> =
        Arc::new(Mutex::new((TaskStatus::Succeeded, None)));

    for constituent in tasks {
        let source = source.clone();
        let remaining = Arc::clone(&remaining);
        let worst = Arc::clone(&worst);
        constituent.on_completed(move |completion| {
            {
                let mut worst = worst
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                if completion.status.severity() > worst.0.severity() {
                    *worst = (completion.status, completion.error);
                }
            }
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                let (status, error) = std::mem::replace(
                    &mut *worst
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner),
                    (TaskStatus::Succeeded, None),
                );
                let _ = match status {
                    TaskStatus::Faulted => source
                        .set_error(error.unwrap_or_else(|| Error::new(ErrorKind::TaskFaulted))),
                    TaskStatus::Canceled => source.set_canceled(),
                    _ => source.set_result(()),
                };
            }
        })?;
    }
    Ok(task)
}

/// Returns a task that completes with the index of the first task in
/// `tasks` to complete. A canceled or faulted first completion propagates
/// as cancellation or fault. An empty slice completes canceled.
pub fn when_any(runtime: &Runtime, tasks: &[Task<()>]) -> Result<Task<usize>> {
    let (source, task) = runtime.task_source::<usize>();
    if tasks.is_empty() {
        source.set_canceled()?;
        return Ok(task);
    }

    let claimed = Arc::new(AtomicBool::new(false));
    for (index, constituent) in tasks.iter().enumerate() {
        let source = source.clone();
        let claimed = Arc::clone(&claimed);
        constituent.on_completed(move |completion| {
            if claimed.swap(true, Ordering::AcqRel) {
                return;
            }
            let _ = match completion.status {
                TaskStatus::Succeeded => source.set_result(index),
                TaskStatus::Canceled => source.set_canceled(),
                _ => source.set_error(
                    completion
                        .error
                        .unwrap_or_else(|| Error::new(ErrorKind::TaskFaulted)),
                ),
            };
        })?;
    }
    Ok(task)
}
