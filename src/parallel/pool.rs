//! Fixed worker pool draining a shared FIFO work queue.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_queue::SegQueue;

type Job = Box<dyn FnOnce() + Send>;

struct PoolInner {
    queue: SegQueue<Job>,
    shutdown: AtomicBool,
    /// Condition variable for worker parking.
    condvar: Condvar,
    /// Mutex for the condition variable.
    mutex: Mutex<()>,
    active: AtomicUsize,
    threads: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// A fixed set of background worker threads.
///
/// Workers drain a shared FIFO queue and park on a condvar when idle.
/// Shutdown lets workers drain the remaining queue, then joins every
/// thread. Job panics are isolated and logged; a panicking job never takes
/// its worker down.
pub(crate) struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Spawns `threads` workers eagerly. A pool of zero threads is allowed;
    /// callers are expected to fall back to inline execution.
    pub(crate) fn new(threads: usize, name_prefix: &str) -> Self {
        let inner = Arc::new(PoolInner {
            queue: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
            active: AtomicUsize::new(0),
            threads,
            handles: Mutex::new(Vec::with_capacity(threads)),
        });

        for index in 0..threads {
            let worker = Arc::clone(&inner);
            let name = format!("{name_prefix}-worker-{index}");
            let handle = thread::Builder::new()
                .name(name)
                .spawn(move || {
                    worker.active.fetch_add(1, Ordering::Relaxed);
                    worker_loop(&worker);
                    worker.active.fetch_sub(1, Ordering::Relaxed);
                })
                .expect("failed to spawn worker thread");
            inner
                .handles
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(handle);
        }

        Self { inner }
    }

    /// Returns the pool's thread count.
    pub(crate) fn threads(&self) -> usize {
        self.inner.threads
    }

    /// Returns true once shutdown has begun.
    pub(crate) fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Submits a job. A shut-down pool rejects the job and hands it back so
    /// the caller can run it inline.
    pub(crate) fn execute(&self, job: Job) -> std::result::Result<(), Job> {
        if self.is_shutdown() {
            return Err(job);
        }
        self.inner.queue.push(job);
        let _guard = self
            .inner
            .mutex
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.inner.condvar.notify_one();
        Ok(())
    }

    /// Begins shutdown, lets workers drain the queue, and joins them all.
    pub(crate) fn shutdown_and_join(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            let _guard = self
                .inner
                .mutex
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            self.inner.condvar.notify_all();
        }
        let handles: Vec<JoinHandle<()>> = {
            let mut handles = self
                .inner
                .handles
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::take(&mut *handles)
        };
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked outside a job");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.inner.threads)
            .field("active", &self.inner.active.load(Ordering::Relaxed))
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        // Pop before checking shutdown so the queue drains on shutdown.
        if let Some(job) = inner.queue.pop() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                let err = crate::Error::panicked(payload.as_ref());
                tracing::error!(error = %err, "worker job panicked");
            }
            continue;
        }
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        let guard = inner
            .mutex
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // Re-check with the lock held: a submit may have raced the pop.
        if !inner.queue.is_empty() || inner.shutdown.load(Ordering::Acquire) {
            continue;
        }
        let _guard = inner
            .condvar
            .wait(guard)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
    }
}
