//! Scheduler runtime: owner of all process-scoped scheduler state.
//!
//! A [`Runtime`] owns the worker pool, the task-cell free list, the
//! monotonic action-id counter, and the stack of currently-ticking streams.
//! Nothing here is ambient static state: two runtimes in one process are
//! fully independent, which keeps the design testable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::config::SchedulerConfig;
use crate::parallel::WorkerPool;
use crate::stream::{ExecutionStream, StreamInner};
use crate::task::{Task, TaskPool, TaskSource};

pub(crate) struct RuntimeShared {
    pub(crate) pool: WorkerPool,
    pub(crate) tasks: Arc<TaskPool>,
    config: SchedulerConfig,
    next_action_id: AtomicU64,
    /// Stack of currently-ticking streams: nested managed-stream ticks
    /// push and pop in LIFO order on the tick thread.
    current: Mutex<Vec<Weak<StreamInner>>>,
}

impl RuntimeShared {
    pub(crate) fn next_action_id(&self) -> u64 {
        self.next_action_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn push_current(&self, inner: &Arc<StreamInner>) {
        self.current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Arc::downgrade(inner));
    }

    pub(crate) fn pop_current(&self) {
        self.current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop();
    }

    pub(crate) fn current(&self) -> Option<Arc<StreamInner>> {
        self.current
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .last()
            .and_then(Weak::upgrade)
    }
}

/// One scheduler instance.
///
/// Streams are created from a runtime and share its worker pool and task
/// pool. Dropping the runtime shuts the worker pool down (draining queued
/// work and joining every thread); streams created from it stay usable for
/// sequential work, with parallel fan-outs falling back to inline
/// execution.
///
/// # Example
///
/// ```
/// use tickstream::runtime::Runtime;
/// use tickstream::cancel::CancelToken;
/// use tickstream::action::Flow;
///
/// let runtime = Runtime::new();
/// let stream = runtime.stream("main");
/// stream
///     .add(|_dt, _cx| Flow::next(), CancelToken::none(), 0)
///     .unwrap();
/// stream.tick(0.016).unwrap();
/// ```
pub struct Runtime {
    shared: Arc<RuntimeShared>,
}

impl Runtime {
    /// Creates a runtime with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Creates a runtime with the given configuration.
    #[must_use]
    pub fn with_config(config: SchedulerConfig) -> Self {
        let threads = config.resolved_worker_threads();
        let pool = WorkerPool::new(threads, config.thread_name_prefix());
        Self {
            shared: Arc::new(RuntimeShared {
                pool,
                tasks: TaskPool::new(),
                config,
                next_action_id: AtomicU64::new(1),
                current: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the configuration this runtime was built with.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Returns the worker pool size.
    #[must_use]
    pub fn worker_threads(&self) -> usize {
        self.shared.pool.threads()
    }

    /// Creates a new execution stream.
    #[must_use]
    pub fn stream(&self, name: impl Into<String>) -> ExecutionStream {
        ExecutionStream::new(
            Arc::clone(&self.shared),
            name.into(),
            self.shared.config.default_strategy(),
        )
    }

    /// Returns the innermost currently-ticking stream, if the caller is
    /// executing inside a tick. This is how suspend points capture the
    /// stream their continuation must resume on.
    #[must_use]
    pub fn current_stream(&self) -> Option<ExecutionStream> {
        self.shared.current().map(ExecutionStream::from_inner)
    }

    /// Acquires a pooled task source/task pair.
    #[must_use]
    pub fn task_source<T: Send + 'static>(&self) -> (TaskSource<T>, Task<T>) {
        self.shared.tasks.acquire()
    }

    /// Shuts the worker pool down: drains queued work and joins every
    /// worker thread. Subsequent parallel fan-outs run inline on the tick
    /// thread.
    pub fn shutdown(&self) {
        self.shared.pool.shutdown_and_join();
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("worker_threads", &self.worker_threads())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_ids_are_monotonic() {
        let runtime = Runtime::with_config(SchedulerConfig::new().with_worker_threads(1));
        let a = runtime.shared.next_action_id();
        let b = runtime.shared.next_action_id();
        assert!(b > a);
    }

    #[test]
    fn no_current_stream_outside_a_tick() {
        let runtime = Runtime::with_config(SchedulerConfig::new().with_worker_threads(1));
        assert!(runtime.current_stream().is_none());
    }

    #[test]
    fn two_runtimes_are_independent() {
        let a = Runtime::with_config(SchedulerConfig::new().with_worker_threads(1));
        let b = Runtime::with_config(SchedulerConfig::new().with_worker_threads(2));
        assert_eq!(a.worker_threads(), 1);
        assert_eq!(b.worker_threads(), 2);
    }
}
