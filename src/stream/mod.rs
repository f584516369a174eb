//! The execution stream: one prioritized, tick-driven set of actions.
//!
//! A stream owns two storages — sequential and parallel — and a strict
//! lifecycle state machine. One tick: refresh both storages, early-return
//! if nothing is live, enter `Running`, start the parallel fan-out, walk
//! the sequential list in `(priority, id)` order, join the fan-out barrier,
//! and return to `Idle`. Re-entrant ticks on the same stream are fatal
//! usage errors; ticking a *different* stream from inside an action (a
//! managed child) is the normal nesting path and tracked on the runtime's
//! current-stream stack.

pub mod managed;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use smallvec::SmallVec;

use crate::action::conditional::Conditional;
use crate::action::core::ActionCore;
use crate::action::coroutine::{CoroStep, Coroutine};
use crate::action::future::FutureAction;
use crate::action::once::Once;
use crate::action::persistent::Persistent;
use crate::action::temporal::Temporal;
use crate::action::timer::Timer;
use crate::action::{ActionCx, ActionHandle, Behavior, Flow, LiveAction, Step};
use crate::cancel::CancelToken;
use crate::config::ParallelWorkStrategy;
use crate::error::Error;
use crate::parallel::{Distributor, ParallelEntry};
use crate::runtime::RuntimeShared;
use crate::storage::{push_pending, PendingQueue, Storage, StorageSignals};
use crate::task::Task;
use crate::Result;

pub use managed::{join, LockMode, ManagedStream, StreamLock};

/// Lifecycle state of an execution stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Ready to tick.
    Idle,
    /// Inside a tick on the driving thread.
    Running,
    /// Teardown in progress.
    Disposing,
    /// Torn down; every operation is a usage error.
    Disposed,
    /// Poisoned by a re-entrant tick; disposed on next touch.
    Invalid,
}

type DisposeCallback = Box<dyn FnOnce() + Send>;

pub(crate) struct StreamInner {
    name: String,
    runtime: Arc<RuntimeShared>,
    state: Mutex<StreamState>,
    seq: Mutex<Storage<LiveAction>>,
    par: Mutex<Storage<Arc<ParallelEntry>>>,
    seq_pending: PendingQueue<LiveAction>,
    par_pending: PendingQueue<Arc<ParallelEntry>>,
    seq_signals: Weak<StorageSignals>,
    par_signals: Weak<StorageSignals>,
    strategy: Mutex<ParallelWorkStrategy>,
    distributor: Distributor,
    after_tick: Mutex<Vec<DisposeCallback>>,
    dispose_callbacks: Mutex<SmallVec<[DisposeCallback; 2]>>,
}

/// Handle to an execution stream. Cheap to clone; all clones refer to the
/// same stream.
#[derive(Clone)]
pub struct ExecutionStream {
    inner: Arc<StreamInner>,
}

impl ExecutionStream {
    pub(crate) fn new(
        runtime: Arc<RuntimeShared>,
        name: String,
        strategy: ParallelWorkStrategy,
    ) -> Self {
        let seq: Storage<LiveAction> = Storage::new();
        let par: Storage<Arc<ParallelEntry>> = Storage::new();
        let inner = StreamInner {
            name,
            runtime,
            state: Mutex::new(StreamState::Idle),
            seq_pending: seq.pending(),
            par_pending: par.pending(),
            seq_signals: seq.signals_weak(),
            par_signals: par.signals_weak(),
            seq: Mutex::new(seq),
            par: Mutex::new(par),
            strategy: Mutex::new(strategy),
            distributor: Distributor::new(),
            after_tick: Mutex::new(Vec::new()),
            dispose_callbacks: Mutex::new(SmallVec::new()),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn from_inner(inner: Arc<StreamInner>) -> Self {
        Self { inner }
    }

    /// Returns the stream's name.
    #[must_use]
    pub fn name(&self) -> String {
        self.inner.name.clone()
    }

    /// Returns the stream's lifecycle state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        *lock(&self.inner.state)
    }

    /// Returns true once the stream is disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        matches!(self.state(), StreamState::Disposed)
    }

    /// Sets the fan-out sizing strategy; read at the next tick.
    pub fn set_strategy(&self, strategy: ParallelWorkStrategy) {
        *lock(&self.inner.strategy) = strategy;
    }

    /// Returns the current fan-out strategy.
    #[must_use]
    pub fn strategy(&self) -> ParallelWorkStrategy {
        *lock(&self.inner.strategy)
    }

    /// Runs one tick with `dt` seconds of elapsed time.
    ///
    /// # Errors
    ///
    /// - negative or non-finite `dt` is a usage error
    /// - ticking a disposing/disposed stream is a usage error
    /// - a re-entrant tick (from inside one of this stream's own actions)
    ///   force-disposes the stream and returns a usage error
    pub fn tick(&self, dt: f64) -> Result<()> {
        if !(dt.is_finite() && dt >= 0.0) {
            return Err(Error::invalid_duration(dt));
        }
        {
            let mut state = lock(&self.inner.state);
            match *state {
                StreamState::Disposing | StreamState::Disposed => {
                    return Err(Error::disposed(&self.inner.name));
                }
                StreamState::Invalid => {
                    drop(state);
                    self.dispose_now();
                    return Err(Error::invalid(&self.inner.name));
                }
                StreamState::Running => {
                    *state = StreamState::Invalid;
                    drop(state);
                    self.force_dispose_reentrant();
                    return Err(Error::reentrant_tick(&self.inner.name));
                }
                StreamState::Idle => {}
            }
        }

        let mut seq = lock(&self.inner.seq);
        seq.refresh();
        let snapshot: Vec<Arc<ParallelEntry>> = {
            let mut par = lock(&self.inner.par);
            par.refresh();
            if seq.is_empty() && par.is_empty() {
                return Ok(());
            }
            par.live().to_vec()
        };

        *lock(&self.inner.state) = StreamState::Running;
        self.inner.runtime.push_current(&self.inner);

        if !snapshot.is_empty() {
            let strategy = self.strategy();
            let count = snapshot.len();
            let body: Arc<dyn Fn(f64, usize) + Send + Sync> =
                Arc::new(move |dt, index| snapshot[index].invoke(dt));
            if let Err(err) =
                self.inner
                    .distributor
                    .start(&self.inner.runtime.pool, dt, count, strategy, body)
            {
                tracing::error!(stream = %self.inner.name, error = %err, "parallel fan-out failed");
            }
        }

        for index in 0..seq.len() {
            if !matches!(*lock(&self.inner.state), StreamState::Running) {
                // Force-disposed by a re-entrant inner tick; abort.
                break;
            }
            let entry = &mut seq.live_mut()[index];
            let core = Arc::clone(&entry.core);
            if core.is_cancelled() || core.is_retired() {
                continue;
            }
            let behavior = &mut entry.behavior;
            match catch_unwind(AssertUnwindSafe(|| behavior.invoke(dt, &core))) {
                Ok(Ok(Step::Continue)) => {}
                Ok(Ok(Step::Done)) => core.retire(),
                Ok(Err(err)) => {
                    tracing::error!(
                        stream = %self.inner.name,
                        action = %core.name(),
                        error = %err,
                        "action failed; removing it",
                    );
                    core.retire();
                }
                Err(payload) => {
                    let err = Error::panicked(payload.as_ref());
                    tracing::error!(
                        stream = %self.inner.name,
                        action = %core.name(),
                        error = %err,
                        "action panicked; removing it",
                    );
                    core.retire();
                }
            }
        }

        self.inner.distributor.wait();
        drop(seq);
        self.inner.runtime.pop_current();

        let force_disposed = {
            let mut state = lock(&self.inner.state);
            if matches!(*state, StreamState::Running) {
                *state = StreamState::Idle;
                false
            } else {
                true
            }
        };
        if force_disposed {
            self.clear_storages();
        }

        let deferred: Vec<DisposeCallback> = {
            let mut after = lock(&self.inner.after_tick);
            std::mem::take(&mut *after)
        };
        for callback in deferred {
            callback();
        }
        Ok(())
    }

    /// Disposes the stream: clears both storages (retiring every action)
    /// and fires dispose callbacks. Idempotent. Called during a tick, the
    /// dispose is deferred to the end of that tick so storages are never
    /// mutated under iteration.
    pub fn dispose(&self) {
        {
            let mut state = lock(&self.inner.state);
            match *state {
                StreamState::Disposed | StreamState::Disposing => return,
                StreamState::Running => {
                    drop(state);
                    let this = self.clone();
                    lock(&self.inner.after_tick).push(Box::new(move || this.dispose()));
                    return;
                }
                StreamState::Idle | StreamState::Invalid => {
                    *state = StreamState::Disposing;
                }
            }
        }
        self.dispose_now();
    }

    fn dispose_now(&self) {
        tracing::debug!(stream = %self.inner.name, "disposing stream");
        self.clear_storages();
        self.run_dispose_callbacks();
        *lock(&self.inner.state) = StreamState::Disposed;
    }

    /// Re-entrant tick path: runs on the tick thread while the outer tick
    /// still holds the storage locks, so only callbacks and state are
    /// touched here — the outer tick clears the storages as it unwinds.
    /// State moves to Disposed first so a dispose callback that calls
    /// `dispose()` sees a terminal state instead of re-locking storages.
    fn force_dispose_reentrant(&self) {
        *lock(&self.inner.state) = StreamState::Disposed;
        self.run_dispose_callbacks();
    }

    fn clear_storages(&self) {
        lock(&self.inner.seq).clear();
        lock(&self.inner.par).clear();
    }

    fn run_dispose_callbacks(&self) {
        let drained: SmallVec<[DisposeCallback; 2]> = {
            let mut callbacks = lock(&self.inner.dispose_callbacks);
            std::mem::take(&mut *callbacks)
        };
        for callback in drained {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
                let err = Error::panicked(payload.as_ref());
                tracing::error!(stream = %self.inner.name, error = %err, "dispose callback panicked");
            }
        }
    }

    /// Registers a callback fired when the stream is disposed.
    pub fn on_dispose(&self, callback: impl FnOnce() + Send + 'static) -> Result<()> {
        self.ensure_schedulable()?;
        lock(&self.inner.dispose_callbacks).push(Box::new(callback));
        Ok(())
    }

    // === scheduling ===

    /// Adds a persistent action: fires every eligible tick until cancelled.
    pub fn add<F>(&self, body: F, token: CancelToken, priority: u32) -> Result<ActionHandle>
    where
        F: FnMut(f64, &mut ActionCx) -> Flow + Send + 'static,
    {
        self.ensure_schedulable()?;
        let core = self.new_core("action", priority);
        self.push_sequential(core, Box::new(Persistent::new(body)), &token)
    }

    /// Adds a parallel action: fires every tick on a worker thread. The
    /// body must be independent of other actions and must not touch stream
    /// state.
    pub fn add_parallel<F>(&self, body: F, token: CancelToken) -> Result<ActionHandle>
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.ensure_schedulable()?;
        let core = self.new_core("parallel", 0);
        core.bind_storage(self.inner.par_signals.clone());
        ActionCore::bind_token(&core, &token);
        let entry = Arc::new(ParallelEntry::new(Arc::clone(&core), Box::new(body)));
        push_pending(&self.inner.par_pending, entry);
        Ok(ActionHandle::new(core))
    }

    /// Adds a temporary action: persistent semantics bounded by `duration`
    /// seconds of consumed tick time.
    pub fn add_temporary<F>(
        &self,
        duration: f64,
        body: F,
        token: CancelToken,
        priority: u32,
    ) -> Result<ActionHandle>
    where
        F: FnMut(f64, &mut ActionCx) -> Flow + Send + 'static,
    {
        self.ensure_schedulable()?;
        Self::ensure_duration(duration)?;
        let core = self.new_core("temporary", priority);
        self.push_sequential(core, Box::new(Temporal::new(duration, body)), &token)
    }

    /// Adds a conditional action: fires while `predicate` is true and
    /// completes on the first tick it turns false.
    pub fn add_conditional<P, F>(
        &self,
        predicate: P,
        body: F,
        token: CancelToken,
        priority: u32,
    ) -> Result<ActionHandle>
    where
        P: FnMut() -> bool + Send + 'static,
        F: FnMut(f64, &mut ActionCx) -> Flow + Send + 'static,
    {
        self.ensure_schedulable()?;
        let core = self.new_core("conditional", priority);
        self.push_sequential(core, Box::new(Conditional::new(predicate, body)), &token)
    }

    /// Adds a one-shot action: fires exactly once on the next tick.
    pub fn add_once<F>(&self, callback: F, token: CancelToken, priority: u32) -> Result<ActionHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_schedulable()?;
        let core = self.new_core("once", priority);
        self.push_sequential(core, Box::new(Once::new(callback)), &token)
    }

    /// Adds a timer: pure delay firing `on_complete` once `duration`
    /// seconds of tick time have elapsed.
    pub fn add_timer<F>(&self, duration: f64, on_complete: F, token: CancelToken) -> Result<ActionHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_schedulable()?;
        Self::ensure_duration(duration)?;
        let core = self.new_core("timer", 0);
        self.push_sequential(core, Box::new(Timer::new(duration, on_complete)), &token)
    }

    /// Adds a coroutine-style action: advances `step` once per visited tick
    /// until it reports [`CoroStep::Complete`].
    pub fn add_coroutine<F>(
        &self,
        step: F,
        token: CancelToken,
        priority: u32,
    ) -> Result<ActionHandle>
    where
        F: FnMut(f64) -> CoroStep + Send + 'static,
    {
        self.ensure_schedulable()?;
        let core = self.new_core("coroutine", priority);
        self.push_sequential(core, Box::new(Coroutine::new(step)), &token)
    }

    /// Adds an async action: `factory` is invoked to obtain a task, and
    /// re-invoked each time the previous task succeeds. A faulted task is
    /// reported exactly like a synchronous action error and removes the
    /// action; a canceled task completes it.
    pub fn add_future<F>(
        &self,
        factory: F,
        token: CancelToken,
        priority: u32,
    ) -> Result<ActionHandle>
    where
        F: FnMut() -> Task<()> + Send + 'static,
    {
        self.ensure_schedulable()?;
        let core = self.new_core("future", priority);
        self.push_sequential(core, Box::new(FutureAction::new(factory)), &token)
    }

    /// Merges another stream's storages and dispose callbacks into this
    /// one, then disposes the absorbed stream. Must not be called while
    /// either stream is mid-tick.
    pub(crate) fn absorb(&self, other: &ExecutionStream) {
        {
            let mut mine = lock(&self.inner.seq);
            let mut theirs = lock(&other.inner.seq);
            mine.copy_from(&mut theirs);
        }
        {
            let mut mine = lock(&self.inner.par);
            let mut theirs = lock(&other.inner.par);
            mine.copy_from(&mut theirs);
        }
        {
            let mut mine = lock(&self.inner.dispose_callbacks);
            let mut theirs = lock(&other.inner.dispose_callbacks);
            mine.extend(theirs.drain(..));
        }
        other.dispose();
    }

    pub(crate) fn runtime(&self) -> &Arc<RuntimeShared> {
        &self.inner.runtime
    }

    fn ensure_schedulable(&self) -> Result<()> {
        match self.state() {
            StreamState::Disposing | StreamState::Disposed => {
                Err(Error::disposed(&self.inner.name))
            }
            StreamState::Invalid => Err(Error::invalid(&self.inner.name)),
            StreamState::Idle | StreamState::Running => Ok(()),
        }
    }

    fn ensure_duration(seconds: f64) -> Result<()> {
        if seconds.is_finite() && seconds > 0.0 {
            Ok(())
        } else {
            Err(Error::invalid_duration(seconds))
        }
    }

    fn new_core(&self, kind: &str, priority: u32) -> Arc<ActionCore> {
        let id = self.inner.runtime.next_action_id();
        Arc::new(ActionCore::new(id, format!("{kind}-{id}"), priority))
    }

    fn push_sequential(
        &self,
        core: Arc<ActionCore>,
        behavior: Box<dyn Behavior>,
        token: &CancelToken,
    ) -> Result<ActionHandle> {
        core.bind_storage(self.inner.seq_signals.clone());
        ActionCore::bind_token(&core, token);
        push_pending(
            &self.inner.seq_pending,
            LiveAction::new(Arc::clone(&core), behavior),
        );
        Ok(ActionHandle::new(core))
    }
}

impl std::fmt::Debug for ExecutionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionStream")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
