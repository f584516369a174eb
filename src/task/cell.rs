//! The versioned completion cell behind tasks and task sources.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use smallvec::SmallVec;

use crate::error::Error;
use crate::task::{Completion, TaskStatus};
use crate::Result;

pub(crate) type Continuation = Box<dyn FnOnce(&Completion) + Send>;

pub(crate) enum CompleteWith<T> {
    Result(T),
    Canceled,
    Error(Error),
}

struct CellState<T> {
    status: TaskStatus,
    result: Option<T>,
    error: Option<Error>,
    continuations: SmallVec<[Continuation; 2]>,
}

/// A reusable completion cell. One "completion window" spans from a pool
/// acquisition (which bumps the version) to the next acquisition; handles
/// carry the version they were created under and fail once it moves on.
pub(crate) struct TaskCell<T> {
    version: AtomicU32,
    state: Mutex<CellState<T>>,
}

impl<T: Send> TaskCell<T> {
    pub(crate) fn new() -> Self {
        Self {
            version: AtomicU32::new(0),
            state: Mutex::new(CellState {
                status: TaskStatus::Pending,
                result: None,
                error: None,
                continuations: SmallVec::new(),
            }),
        }
    }

    pub(crate) fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    /// Resets the cell for a new completion window and returns the new
    /// version. Called only by the pool on acquisition.
    pub(crate) fn reset(&self) -> u32 {
        let mut state = self.lock();
        state.status = TaskStatus::Pending;
        state.result = None;
        state.error = None;
        state.continuations.clear();
        drop(state);
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn check(&self, version: u32) -> Result<()> {
        let current = self.version();
        if current == version {
            Ok(())
        } else {
            Err(Error::stale_task(version, current))
        }
    }

    pub(crate) fn status(&self, version: u32) -> Result<TaskStatus> {
        self.check(version)?;
        Ok(self.lock().status)
    }

    /// Takes the result out of a succeeded cell. Subsequent calls observe
    /// `None`.
    pub(crate) fn take_result(&self, version: u32) -> Result<Option<T>> {
        self.check(version)?;
        let mut state = self.lock();
        if matches!(state.status, TaskStatus::Succeeded) {
            Ok(state.result.take())
        } else {
            Ok(None)
        }
    }

    /// Registers a continuation: queued while pending, invoked immediately
    /// (synchronously) once terminal.
    pub(crate) fn on_completed(&self, version: u32, continuation: Continuation) -> Result<()> {
        self.check(version)?;
        let mut state = self.lock();
        if state.status.is_terminal() {
            let completion = Completion {
                status: state.status,
                error: state.error.clone(),
            };
            drop(state);
            continuation(&completion);
        } else {
            state.continuations.push(continuation);
        }
        Ok(())
    }

    /// Completes the cell. The first terminal transition wins; later calls
    /// within the same window are no-ops returning `Ok(false)`.
    ///
    /// Continuations are drained in enqueue order after the state lock is
    /// released, so a continuation may safely query the same cell.
    pub(crate) fn complete(&self, version: u32, with: CompleteWith<T>) -> Result<bool> {
        self.check(version)?;
        let (completion, drained) = {
            let mut state = self.lock();
            if state.status.is_terminal() {
                return Ok(false);
            }
            match with {
                CompleteWith::Result(value) => {
                    state.status = TaskStatus::Succeeded;
                    state.result = Some(value);
                }
                CompleteWith::Canceled => {
                    state.status = TaskStatus::Canceled;
                }
                CompleteWith::Error(error) => {
                    state.status = TaskStatus::Faulted;
                    state.error = Some(error);
                }
            }
            let completion = Completion {
                status: state.status,
                error: state.error.clone(),
            };
            let drained = std::mem::take(&mut state.continuations);
            (completion, drained)
        };
        for continuation in drained {
            continuation(&completion);
        }
        Ok(true)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CellState<T>> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn completion_drains_continuations_in_order() {
        let cell: TaskCell<()> = TaskCell::new();
        let v = cell.reset();
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let log = Arc::clone(&order);
            cell.on_completed(v, Box::new(move |_| log.lock().unwrap().push(n)))
                .unwrap();
        }

        assert!(cell.complete(v, CompleteWith::Result(())).unwrap());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn second_completion_is_a_noop() {
        let cell: TaskCell<u32> = TaskCell::new();
        let v = cell.reset();
        assert!(cell.complete(v, CompleteWith::Result(1)).unwrap());
        assert!(!cell.complete(v, CompleteWith::Result(2)).unwrap());
        assert_eq!(cell.take_result(v).unwrap(), Some(1));
    }

    #[test]
    fn late_registration_fires_immediately() {
        let cell: TaskCell<()> = TaskCell::new();
        let v = cell.reset();
        cell.complete(v, CompleteWith::Canceled).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        cell.on_completed(
            v,
            Box::new(move |c| {
                assert!(c.is_canceled());
                f.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stale_version_is_a_defined_error() {
        let cell: TaskCell<()> = TaskCell::new();
        let v = cell.reset();
        cell.complete(v, CompleteWith::Result(())).unwrap();
        let _v2 = cell.reset();

        let err = cell.status(v).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::StaleTaskHandle);
        assert!(cell
            .complete(v, CompleteWith::Result(()))
            .is_err());
    }

    #[test]
    fn continuation_may_requery_the_cell() {
        let cell: Arc<TaskCell<()>> = Arc::new(TaskCell::new());
        let v = cell.reset();
        let observed = Arc::new(Mutex::new(None));

        let c = Arc::clone(&cell);
        let o = Arc::clone(&observed);
        cell.on_completed(
            v,
            Box::new(move |_| {
                // The state lock is released before continuations run.
                *o.lock().unwrap() = Some(c.status(v).unwrap());
            }),
        )
        .unwrap();

        cell.complete(v, CompleteWith::Result(())).unwrap();
        assert_eq!(*observed.lock().unwrap(), Some(TaskStatus::Succeeded));
    }
}
