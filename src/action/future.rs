//! Async action: drives a task-returning function across ticks.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::action::core::ActionCore;
use crate::action::{Behavior, Step};
use crate::error::{Error, ErrorKind};
use crate::task::Task;
use crate::Result;

const WATCH_PENDING: u8 = 0;
const WATCH_SUCCEEDED: u8 = 1;
const WATCH_CANCELED: u8 = 2;
const WATCH_FAULTED: u8 = 3;

/// Completion watcher for the in-flight task.
///
/// The watcher observes completion through a continuation registered at
/// task creation, so the action never queries a handle that may have been
/// recycled by the pool between ticks.
struct Watcher {
    state: Arc<AtomicU8>,
    error: Arc<Mutex<Option<Error>>>,
}

impl Watcher {
    fn attach(task: &Task<()>) -> Result<Self> {
        let state = Arc::new(AtomicU8::new(WATCH_PENDING));
        let error = Arc::new(Mutex::new(None));
        let s = Arc::clone(&state);
        let e = Arc::clone(&error);
        task.on_completed(move |completion| {
            if let Some(err) = completion.error {
                *e.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(err);
            }
            let observed = match completion.status {
                crate::task::TaskStatus::Succeeded => WATCH_SUCCEEDED,
                crate::task::TaskStatus::Canceled => WATCH_CANCELED,
                _ => WATCH_FAULTED,
            };
            s.store(observed, Ordering::Release);
        })?;
        Ok(Self { state, error })
    }

    fn observed(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    fn take_error(&self) -> Option<Error> {
        self.error
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }
}

pub(crate) struct FutureAction<F> {
    factory: F,
    inflight: Option<Watcher>,
}

impl<F> FutureAction<F>
where
    F: FnMut() -> Task<()> + Send,
{
    pub(crate) fn new(factory: F) -> Self {
        Self {
            factory,
            inflight: None,
        }
    }

    fn begin_next(&mut self) -> Result<()> {
        let task = (self.factory)();
        self.inflight = Some(Watcher::attach(&task)?);
        Ok(())
    }
}

impl<F> Behavior for FutureAction<F>
where
    F: FnMut() -> Task<()> + Send,
{
    fn invoke(&mut self, dt: f64, core: &ActionCore) -> Result<Step> {
        if !core.tick_gate(dt) {
            return Ok(Step::Continue);
        }
        match &self.inflight {
            None => {
                self.begin_next()?;
                Ok(Step::Continue)
            }
            Some(watcher) => match watcher.observed() {
                WATCH_PENDING => Ok(Step::Continue),
                WATCH_SUCCEEDED => {
                    self.begin_next()?;
                    Ok(Step::Continue)
                }
                WATCH_CANCELED => Ok(Step::Done),
                _ => {
                    let err = watcher
                        .take_error()
                        .unwrap_or_else(|| Error::new(ErrorKind::TaskFaulted));
                    self.inflight = None;
                    Err(err)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskPool, TaskSource};
    use std::sync::atomic::AtomicUsize;

    fn harness() -> (Arc<TaskPool>, Arc<Mutex<Vec<TaskSource<()>>>>) {
        (TaskPool::new(), Arc::new(Mutex::new(Vec::new())))
    }

    fn core() -> ActionCore {
        ActionCore::new(1, "future".to_string(), 0)
    }

    #[test]
    fn reinvokes_factory_after_each_success() {
        let (pool, sources) = harness();
        let invocations = Arc::new(AtomicUsize::new(0));

        let p = Arc::clone(&pool);
        let s = Arc::clone(&sources);
        let n = Arc::clone(&invocations);
        let mut action = FutureAction::new(move || {
            n.fetch_add(1, Ordering::SeqCst);
            let (source, task) = p.acquire::<()>();
            s.lock().unwrap().push(source);
            task
        });
        let core = core();

        // First tick obtains the first task.
        assert_eq!(action.invoke(0.1, &core).unwrap(), Step::Continue);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);

        // Still pending: no new invocation.
        assert_eq!(action.invoke(0.1, &core).unwrap(), Step::Continue);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);

        // Complete it; the next tick obtains the second task.
        sources.lock().unwrap().remove(0).set_result(()).unwrap();
        assert_eq!(action.invoke(0.1, &core).unwrap(), Step::Continue);
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn faulted_task_raises_from_the_current_tick() {
        let (pool, sources) = harness();
        let p = Arc::clone(&pool);
        let s = Arc::clone(&sources);
        let mut action = FutureAction::new(move || {
            let (source, task) = p.acquire::<()>();
            s.lock().unwrap().push(source);
            task
        });
        let core = core();

        action.invoke(0.1, &core).unwrap();
        sources
            .lock()
            .unwrap()
            .remove(0)
            .set_error(Error::with_message(ErrorKind::TaskFaulted, "exploded"))
            .unwrap();

        let err = action.invoke(0.1, &core).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TaskFaulted);
        assert_eq!(err.message(), Some("exploded"));
    }

    #[test]
    fn canceled_task_completes_the_action() {
        let (pool, sources) = harness();
        let p = Arc::clone(&pool);
        let s = Arc::clone(&sources);
        let mut action = FutureAction::new(move || {
            let (source, task) = p.acquire::<()>();
            s.lock().unwrap().push(source);
            task
        });
        let core = core();

        action.invoke(0.1, &core).unwrap();
        sources.lock().unwrap().remove(0).set_canceled().unwrap();
        assert_eq!(action.invoke(0.1, &core).unwrap(), Step::Done);
    }
}
