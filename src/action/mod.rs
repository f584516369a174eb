//! Scheduled units of work and their variant state machines.
//!
//! Every action pairs a user callback with shared scheduling state: a
//! priority, a creation id (the FIFO tie-break), a cancellation token, an
//! optional fixed virtual delta, an optional tick-rate divisor, and a
//! sleep gate. The variants differ only in their repeat/termination
//! policy:
//!
//! - persistent — fires until cancelled
//! - temporal — fires until its duration is consumed
//! - conditional — fires while a predicate holds
//! - once — fires exactly once
//! - timer — pure delay, fires a completion callback
//! - coroutine — advances a step function once per tick
//! - future — drives a task-returning function

pub(crate) mod conditional;
pub(crate) mod coroutine;
pub(crate) mod core;
pub(crate) mod future;
pub mod handle;
pub(crate) mod once;
pub(crate) mod persistent;
pub(crate) mod temporal;
pub(crate) mod timer;

pub use coroutine::CoroStep;
pub use handle::ActionHandle;

use self::core::{ActionCore, SleepState};
use std::sync::Arc;

/// Slack for countdown comparisons: repeated `remaining -= dt` leaves
/// residues around 1e-16, which must not push a fire to an extra tick.
pub(crate) const TIME_EPSILON: f64 = 1e-9;

/// Control-flow sentinel returned by self-closing action bodies.
///
/// A body normally returns [`Flow::next`]. Calling [`ActionCx::sleep`] or
/// [`ActionCx::sleep_until`] produces a `Flow` that, when returned, ends
/// the current invocation early — the localized control transfer the
/// scheduler uses instead of unwinding.
#[must_use = "return this value from the action body to take effect"]
#[derive(Debug)]
pub struct Flow {
    pub(crate) kind: FlowKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlowKind {
    Continue,
    Sleep,
}

impl Flow {
    /// Continue normally; the action fires again on its next eligible tick.
    #[must_use]
    pub const fn next() -> Self {
        Self {
            kind: FlowKind::Continue,
        }
    }

    pub(crate) const fn sleeping() -> Self {
        Self {
            kind: FlowKind::Sleep,
        }
    }
}

/// Per-invocation context handed to self-closing action bodies.
///
/// # Example
///
/// ```no_run
/// use tickstream::action::Flow;
/// use tickstream::cancel::CancelToken;
/// use tickstream::runtime::Runtime;
///
/// let runtime = Runtime::new();
/// let stream = runtime.stream("main");
/// stream
///     .add(
///         |dt, cx| {
///             if dt > 0.1 {
///                 // Skip the heavy path for half a second.
///                 return cx.sleep(0.5);
///             }
///             Flow::next()
///         },
///         CancelToken::none(),
///         0,
///     )
///     .unwrap();
/// ```
#[derive(Default)]
pub struct ActionCx {
    pub(crate) requested: Option<SleepState>,
}

impl ActionCx {
    pub(crate) fn new() -> Self {
        Self { requested: None }
    }

    /// Suspends the action for `seconds` of accumulated tick time.
    ///
    /// The returned [`Flow`] must be returned from the body; the rest of
    /// the current invocation is treated as already done for this tick.
    pub fn sleep(&mut self, seconds: f64) -> Flow {
        self.requested = Some(SleepState::For(seconds.max(0.0)));
        Flow::sleeping()
    }

    /// Suspends the action until `wake` returns true.
    ///
    /// The condition is evaluated once per tick while the action sleeps.
    pub fn sleep_until(&mut self, wake: impl FnMut() -> bool + Send + 'static) -> Flow {
        self.requested = Some(SleepState::Until(Box::new(wake)));
        Flow::sleeping()
    }
}

/// Outcome of one action invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Keep the action live.
    Continue,
    /// The action completed; retire it.
    Done,
}

/// A variant state machine: one invocation per visited tick.
pub(crate) trait Behavior: Send {
    fn invoke(&mut self, dt: f64, core: &ActionCore) -> crate::Result<Step>;
}

/// A live sequential action: shared state plus its variant behavior.
pub(crate) struct LiveAction {
    pub(crate) core: Arc<ActionCore>,
    pub(crate) behavior: Box<dyn Behavior>,
}

impl LiveAction {
    pub(crate) fn new(core: Arc<ActionCore>, behavior: Box<dyn Behavior>) -> Self {
        Self { core, behavior }
    }
}
