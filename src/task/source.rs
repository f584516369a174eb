//! Task and task-source handles over a pooled completion cell.

use std::sync::{Arc, Weak};

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::stream::ExecutionStream;
use crate::task::cell::{CompleteWith, TaskCell};
use crate::task::{Completion, TaskPool, TaskStatus};
use crate::Result;

/// Completion side of a task: completes the cell exactly once.
///
/// Cloneable so producer and cancellation wiring can race safely — the
/// first terminal transition wins, later attempts in the same window are
/// no-ops.
pub struct TaskSource<T: Send + 'static> {
    cell: Arc<TaskCell<T>>,
    version: u32,
    pool: Weak<TaskPool>,
}

impl<T: Send + 'static> TaskSource<T> {
    pub(crate) fn new(cell: Arc<TaskCell<T>>, version: u32, pool: Weak<TaskPool>) -> Self {
        Self {
            cell,
            version,
            pool,
        }
    }

    /// Returns the consumer handle for this source.
    #[must_use]
    pub fn task(&self) -> Task<T> {
        Task {
            cell: Arc::clone(&self.cell),
            version: self.version,
        }
    }

    /// Completes the task with a result.
    ///
    /// Returns `Ok(true)` on the first completion, `Ok(false)` if the task
    /// already completed, and an error if the source is stale.
    pub fn set_result(&self, value: T) -> Result<bool> {
        self.finish(CompleteWith::Result(value))
    }

    /// Completes the task as canceled.
    pub fn set_canceled(&self) -> Result<bool> {
        self.finish(CompleteWith::Canceled)
    }

    /// Completes the task with an error.
    pub fn set_error(&self, error: Error) -> Result<bool> {
        self.finish(CompleteWith::Error(error))
    }

    /// Cancellation wiring helper: cancels the task, swallowing the no-op
    /// and stale cases. Used from token release callbacks where the task
    /// may already have completed or been recycled.
    pub fn try_cancel(&self) {
        let _ = self.set_canceled();
    }

    fn finish(&self, with: CompleteWith<T>) -> Result<bool> {
        let first = self.cell.complete(self.version, with)?;
        if first {
            if let Some(pool) = self.pool.upgrade() {
                pool.recycle(Arc::clone(&self.cell));
            }
        }
        Ok(first)
    }
}

impl<T: Send + 'static> Clone for TaskSource<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            version: self.version,
            pool: self.pool.clone(),
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for TaskSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSource")
            .field("version", &self.version)
            .finish()
    }
}

/// Consumer handle for a pooled, versioned completion cell.
///
/// Valid from acquisition until the cell is recycled for a new task; every
/// query after that fails with
/// [`ErrorKind::StaleTaskHandle`](crate::error::ErrorKind::StaleTaskHandle).
pub struct Task<T: Send + 'static> {
    cell: Arc<TaskCell<T>>,
    version: u32,
}

impl<T: Send + 'static> Task<T> {
    pub(crate) fn new(cell: Arc<TaskCell<T>>, version: u32) -> Self {
        Self { cell, version }
    }

    /// Returns the task's status.
    pub fn status(&self) -> Result<TaskStatus> {
        self.cell.status(self.version)
    }

    /// Returns true if the task has reached a terminal status.
    pub fn is_completed(&self) -> Result<bool> {
        Ok(self.status()?.is_terminal())
    }

    /// Takes the result out of a succeeded task. Later calls observe `None`.
    pub fn try_take_result(&self) -> Result<Option<T>> {
        self.cell.take_result(self.version)
    }

    /// Registers a completion continuation: queued while pending, invoked
    /// immediately (synchronously) if the task already completed.
    pub fn on_completed(&self, f: impl FnOnce(Completion) + Send + 'static) -> Result<()> {
        self.cell
            .on_completed(self.version, Box::new(move |c| f(c.clone())))
    }

    /// Schedules `f` as a one-shot action on `stream` once this task
    /// completes — the suspend/resume protocol. The continuation runs on a
    /// later tick of the stream, never synchronously inside the completing
    /// call, and never on a worker thread.
    ///
    /// A task that is already terminal still resumes on the stream's next
    /// tick.
    pub fn resume_on(
        &self,
        stream: &ExecutionStream,
        f: impl FnOnce(Completion) + Send + 'static,
    ) -> Result<()> {
        let stream = stream.clone();
        self.on_completed(move |completion| {
            let name = stream.name();
            if let Err(err) = stream.add_once(
                move || f(completion),
                CancelToken::none(),
                0,
            ) {
                tracing::debug!(stream = %name, error = %err, "continuation dropped");
            }
        })
    }
}

impl<T: Send + 'static> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            version: self.version,
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("version", &self.version)
            .field("status", &self.status().ok())
            .finish()
    }
}
