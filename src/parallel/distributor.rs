//! Per-tick fan-out round over the worker pool.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::config::ParallelWorkStrategy;
use crate::error::{Error, ErrorKind};
use crate::parallel::WorkerPool;
use crate::Result;

/// State of one fan-out round. Reused across ticks.
struct RoundState {
    /// Shared work-item cursor; workers claim indices with `fetch_add`.
    cursor: AtomicUsize,
    iterations: AtomicUsize,
    workers_left: AtomicUsize,
    in_flight: AtomicBool,
    done: Mutex<bool>,
    signal: Condvar,
}

/// Distributes `iterations` independent work items across pool workers and
/// blocks the tick thread on a join barrier.
///
/// One round at a time: calling [`start`](Distributor::start) while a round
/// has not yet signaled completion is a usage error. A round of zero
/// iterations is a no-op — no workers are engaged and
/// [`wait`](Distributor::wait) returns immediately.
pub(crate) struct Distributor {
    round: Arc<RoundState>,
}

impl Distributor {
    pub(crate) fn new() -> Self {
        Self {
            round: Arc::new(RoundState {
                cursor: AtomicUsize::new(0),
                iterations: AtomicUsize::new(0),
                workers_left: AtomicUsize::new(0),
                in_flight: AtomicBool::new(false),
                done: Mutex::new(true),
                signal: Condvar::new(),
            }),
        }
    }

    /// Starts a round: sizes the worker count from `strategy`, publishes
    /// the cursor, and hands each worker the claim loop.
    pub(crate) fn start(
        &self,
        pool: &WorkerPool,
        dt: f64,
        iterations: usize,
        strategy: ParallelWorkStrategy,
        body: Arc<dyn Fn(f64, usize) + Send + Sync>,
    ) -> Result<()> {
        if iterations == 0 {
            return Ok(());
        }
        if self.round.in_flight.swap(true, Ordering::AcqRel) {
            return Err(Error::with_message(
                ErrorKind::DistributorBusy,
                "previous parallel round has not completed",
            ));
        }

        let workers = strategy.worker_count(iterations, pool.threads());
        if workers == 0 || pool.is_shutdown() {
            // No workers available: run the whole round inline.
            for index in 0..iterations {
                run_item(&body, dt, index);
            }
            self.round.in_flight.store(false, Ordering::Release);
            return Ok(());
        }

        self.round.cursor.store(0, Ordering::Release);
        self.round.iterations.store(iterations, Ordering::Release);
        self.round.workers_left.store(workers, Ordering::Release);
        *self
            .round
            .done
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = false;

        for _ in 0..workers {
            let round = Arc::clone(&self.round);
            let body = Arc::clone(&body);
            let job = Box::new(move || {
                loop {
                    let index = round.cursor.fetch_add(1, Ordering::Relaxed);
                    if index >= round.iterations.load(Ordering::Relaxed) {
                        break;
                    }
                    run_item(&body, dt, index);
                }
                if round.workers_left.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let mut done = round
                        .done
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    *done = true;
                    round.in_flight.store(false, Ordering::Release);
                    round.signal.notify_all();
                }
            });
            if let Err(job) = pool.execute(job) {
                // Pool raced into shutdown; run this worker's share inline.
                job();
            }
        }
        Ok(())
    }

    /// Blocks until the in-flight round (if any) signals completion.
    pub(crate) fn wait(&self) {
        if !self.round.in_flight.load(Ordering::Acquire) {
            return;
        }
        let mut done = self
            .round
            .done
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        while !*done {
            done = self
                .round
                .signal
                .wait(done)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }
}

/// Isolates one work item: a panicking item is logged and the round keeps
/// going, so the barrier always resolves.
fn run_item(body: &Arc<dyn Fn(f64, usize) + Send + Sync>, dt: f64, index: usize) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| body(dt, index))) {
        let err = Error::panicked(payload.as_ref());
        tracing::error!(index, error = %err, "parallel action panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    fn performance() -> ParallelWorkStrategy {
        ParallelWorkStrategy::Performance
    }

    #[test]
    fn zero_iterations_is_a_noop() {
        let pool = WorkerPool::new(2, "dist");
        let dist = Distributor::new();
        let body: Arc<dyn Fn(f64, usize) + Send + Sync> =
            Arc::new(|_, _| panic!("must not run"));
        dist.start(&pool, 0.1, 0, performance(), body).unwrap();
        // No wait required, and wait returns immediately anyway.
        dist.wait();
    }

    #[test]
    fn every_index_claimed_exactly_once() {
        let pool = WorkerPool::new(4, "dist");
        let dist = Distributor::new();
        let claimed = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&claimed);
        let body: Arc<dyn Fn(f64, usize) + Send + Sync> = Arc::new(move |_, index| {
            log.lock().unwrap().push(index);
        });
        dist.start(&pool, 0.1, 100, performance(), body).unwrap();
        dist.wait();

        let seen = claimed.lock().unwrap();
        assert_eq!(seen.len(), 100);
        let unique: HashSet<usize> = seen.iter().copied().collect();
        assert_eq!(unique.len(), 100);
        assert_eq!(*unique.iter().max().unwrap(), 99);
    }

    #[test]
    fn start_while_in_flight_fails_fast() {
        let pool = WorkerPool::new(1, "busy");
        let dist = Distributor::new();
        let gate = Arc::new((Mutex::new(false), Condvar::new()));

        let g = Arc::clone(&gate);
        let body: Arc<dyn Fn(f64, usize) + Send + Sync> = Arc::new(move |_, _| {
            let (lock, cv) = &*g;
            let mut open = lock.lock().unwrap();
            while !*open {
                open = cv.wait(open).unwrap();
            }
        });
        dist.start(&pool, 0.1, 1, performance(), body).unwrap();

        let noop: Arc<dyn Fn(f64, usize) + Send + Sync> = Arc::new(|_, _| {});
        let err = dist
            .start(&pool, 0.1, 1, performance(), noop)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DistributorBusy);

        let (lock, cv) = &*gate;
        *lock.lock().unwrap() = true;
        cv.notify_all();
        dist.wait();
    }

    #[test]
    fn panicking_item_does_not_hang_the_barrier() {
        let pool = WorkerPool::new(2, "boom");
        let dist = Distributor::new();
        let completed = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&completed);
        let body: Arc<dyn Fn(f64, usize) + Send + Sync> = Arc::new(move |_, index| {
            if index == 3 {
                panic!("item failure");
            }
            c.fetch_add(1, Ordering::SeqCst);
        });
        dist.start(&pool, 0.1, 8, performance(), body).unwrap();
        dist.wait();
        assert_eq!(completed.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn rounds_can_repeat_after_wait() {
        let pool = WorkerPool::new(2, "repeat");
        let dist = Distributor::new();
        let total = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let t = Arc::clone(&total);
            let body: Arc<dyn Fn(f64, usize) + Send + Sync> = Arc::new(move |_, _| {
                t.fetch_add(1, Ordering::SeqCst);
            });
            dist.start(&pool, 0.1, 10, performance(), body).unwrap();
            dist.wait();
        }
        assert_eq!(total.load(Ordering::SeqCst), 30);
    }
}
