//! Shared per-action scheduling state.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, Weak};

use smallvec::SmallVec;

use crate::cancel::CancelToken;
use crate::storage::StorageSignals;

type Callback = Box<dyn FnOnce() + Send>;

/// Sleep gate for self-closing actions.
pub(crate) enum SleepState {
    /// Not sleeping.
    Awake,
    /// Sleeping for the given remaining accumulated tick time.
    For(f64),
    /// Sleeping until the condition returns true.
    Until(Box<dyn FnMut() -> bool + Send>),
}

/// Delta pacing: fixed virtual delta and tick-rate divisor.
struct Pacing {
    fixed_delta: Option<f64>,
    accumulated: f64,
    tick_rate: u32,
    ticks_seen: u64,
}

/// State shared between an action's storage entry and its [`ActionHandle`].
///
/// The ordering key `(priority, id)` is load-bearing: lower priority runs
/// earlier, ties resolve by creation id so insertion order is preserved.
///
/// [`ActionHandle`]: crate::action::ActionHandle
pub(crate) struct ActionCore {
    id: u64,
    name: Mutex<String>,
    priority: AtomicU32,
    cancelled: AtomicBool,
    retired: AtomicBool,
    pacing: Mutex<Pacing>,
    sleep: Mutex<SleepState>,
    storage: Mutex<Weak<StorageSignals>>,
    cancel_callbacks: Mutex<SmallVec<[(Callback, CancelToken); 1]>>,
    dispose_callbacks: Mutex<SmallVec<[Callback; 1]>>,
}

impl ActionCore {
    pub(crate) fn new(id: u64, name: String, priority: u32) -> Self {
        Self {
            id,
            name: Mutex::new(name),
            priority: AtomicU32::new(priority),
            cancelled: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            pacing: Mutex::new(Pacing {
                fixed_delta: None,
                accumulated: 0.0,
                tick_rate: 1,
                ticks_seen: 0,
            }),
            sleep: Mutex::new(SleepState::Awake),
            storage: Mutex::new(Weak::new()),
            cancel_callbacks: Mutex::new(SmallVec::new()),
            dispose_callbacks: Mutex::new(SmallVec::new()),
        }
    }

    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn name(&self) -> String {
        self.name.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    pub(crate) fn rename(&self, name: String) {
        *self.name.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = name;
    }

    pub(crate) fn priority(&self) -> u32 {
        self.priority.load(Ordering::Acquire)
    }

    /// Updates the priority and marks the owning storage's sort dirty.
    pub(crate) fn set_priority(&self, priority: u32) {
        self.priority.store(priority, Ordering::Release);
        if let Some(signals) = self.signals() {
            signals.mark_dirty();
        }
    }

    pub(crate) fn set_fixed_delta(&self, delta: Option<f64>) {
        let mut pacing = self.lock_pacing();
        pacing.fixed_delta = delta;
        pacing.accumulated = 0.0;
    }

    pub(crate) fn fixed_delta(&self) -> Option<f64> {
        self.lock_pacing().fixed_delta
    }

    pub(crate) fn set_tick_rate(&self, rate: u32) {
        self.lock_pacing().tick_rate = rate.max(1);
    }

    pub(crate) fn tick_rate(&self) -> u32 {
        self.lock_pacing().tick_rate
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Binds this action to its storage's signal block. Called on add and
    /// again when a storage merge re-homes the entry.
    pub(crate) fn bind_storage(&self, signals: Weak<StorageSignals>) {
        *self
            .storage
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = signals;
    }

    fn signals(&self) -> Option<std::sync::Arc<StorageSignals>> {
        self.storage
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .upgrade()
    }

    /// Registers a callback fired on cancellation, scoped by `scope`: if the
    /// scope token has been released by the time the action is cancelled,
    /// the callback is skipped. Fires immediately if already cancelled.
    pub(crate) fn on_cancel(&self, callback: Callback, scope: CancelToken) {
        if self.is_cancelled() {
            if !scope.is_released() {
                callback();
            }
            return;
        }
        self.cancel_callbacks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((callback, scope));
    }

    /// Registers a callback fired once when the action retires (completes,
    /// is cancelled, or its stream is disposed). Fires immediately if the
    /// action already retired.
    pub(crate) fn on_dispose(&self, callback: Callback) {
        if self.is_retired() {
            callback();
            return;
        }
        self.dispose_callbacks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(callback);
    }

    /// Cooperative cancellation: fires cancel callbacks synchronously and
    /// retires the action. Idempotent.
    pub(crate) fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: SmallVec<[(Callback, CancelToken); 1]> = std::mem::take(
            &mut *self
                .cancel_callbacks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for (callback, scope) in drained {
            if scope.is_released() {
                continue;
            }
            if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
                let err = crate::Error::panicked(payload.as_ref());
                tracing::error!(action = %self.name(), error = %err, "cancel callback panicked");
            }
        }
        self.retire();
    }

    /// Marks the action done, schedules its removal from the owning
    /// storage, and fires dispose callbacks. Idempotent.
    pub(crate) fn retire(&self) {
        if self.retired.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(signals) = self.signals() {
            signals.push_removal(self.id);
        }
        let drained: SmallVec<[Callback; 1]> = std::mem::take(
            &mut *self
                .dispose_callbacks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for callback in drained {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
                let err = crate::Error::panicked(payload.as_ref());
                tracing::error!(action = %self.name(), error = %err, "dispose callback panicked");
            }
        }
    }

    /// Wires `token` so that releasing it cancels the action.
    pub(crate) fn bind_token(core: &std::sync::Arc<Self>, token: &CancelToken) {
        let weak = std::sync::Arc::downgrade(core);
        token.register(move || {
            if let Some(core) = weak.upgrade() {
                core.cancel();
            }
        });
    }

    fn store_sleep(&self, state: SleepState) {
        *self
            .sleep
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = state;
    }

    /// Applies a sleep request produced by the body via [`ActionCx`].
    ///
    /// Returns true if a sleep was requested, which ends the invocation's
    /// remaining fires for this tick.
    ///
    /// [`ActionCx`]: crate::action::ActionCx
    pub(crate) fn apply_sleep(&self, cx: &mut crate::action::ActionCx) -> bool {
        match cx.requested.take() {
            Some(state) => {
                *self
                    .sleep
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = state;
                true
            }
            None => false,
        }
    }

    /// Computes the deltas to fire with on this tick.
    ///
    /// An empty result means the tick is skipped (tick-rate gated or
    /// sleeping). With a fixed virtual delta the result is the drain loop's
    /// slice list: `fixed` repeated while the accumulator covers it.
    pub(crate) fn deltas(&self, dt: f64) -> SmallVec<[f64; 1]> {
        // Sleep gate: the countdown consumes real tick time; a wake
        // condition is polled once per tick, outside the lock.
        let taken = {
            let mut sleep = self
                .sleep
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::replace(&mut *sleep, SleepState::Awake)
        };
        let still_sleeping = match taken {
            SleepState::Awake => false,
            SleepState::For(remaining) => {
                let remaining = remaining - dt;
                if remaining > crate::action::TIME_EPSILON {
                    self.store_sleep(SleepState::For(remaining));
                    true
                } else {
                    false
                }
            }
            SleepState::Until(mut wake) => {
                if wake() {
                    false
                } else {
                    self.store_sleep(SleepState::Until(wake));
                    true
                }
            }
        };
        if still_sleeping {
            return SmallVec::new();
        }

        let mut pacing = self.lock_pacing();
        pacing.ticks_seen += 1;
        if pacing.tick_rate > 1 && pacing.ticks_seen % u64::from(pacing.tick_rate) != 0 {
            return SmallVec::new();
        }
        match pacing.fixed_delta {
            None => smallvec::smallvec![dt],
            Some(fixed) => {
                pacing.accumulated += dt;
                let mut fires = SmallVec::new();
                while pacing.accumulated >= fixed {
                    fires.push(fixed);
                    pacing.accumulated -= fixed;
                }
                fires
            }
        }
    }

    /// Tick-rate and sleep gate without delta accounting, for variants that
    /// advance at most once per tick (coroutine, future).
    pub(crate) fn tick_gate(&self, dt: f64) -> bool {
        !self.deltas(dt).is_empty()
    }

    fn lock_pacing(&self) -> std::sync::MutexGuard<'_, Pacing> {
        self.pacing
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ActionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionCore")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("priority", &self.priority())
            .field("cancelled", &self.is_cancelled())
            .field("retired", &self.is_retired())
            .finish()
    }
}
