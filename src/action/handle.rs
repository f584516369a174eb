//! Public mutation handle for a scheduled action.

use std::sync::Arc;

use crate::action::core::ActionCore;
use crate::cancel::CancelToken;
use crate::error::{Error, ErrorKind};
use crate::Result;

/// Handle to a scheduled action.
///
/// Returned by every `add_*` scheduling call. The handle does not keep the
/// action alive — dropping it leaves the action scheduled — and stays valid
/// after the action retires (mutations then have no observable effect).
#[derive(Clone)]
pub struct ActionHandle {
    core: Arc<ActionCore>,
}

impl ActionHandle {
    pub(crate) fn new(core: Arc<ActionCore>) -> Self {
        Self { core }
    }

    /// Returns the action's creation id (unique per runtime, monotonic).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.core.id()
    }

    /// Returns the action's name.
    #[must_use]
    pub fn name(&self) -> String {
        self.core.name()
    }

    /// Renames the action (diagnostics only).
    pub fn rename(&self, name: impl Into<String>) {
        self.core.rename(name.into());
    }

    /// Returns the current priority. Lower runs earlier.
    #[must_use]
    pub fn priority(&self) -> u32 {
        self.core.priority()
    }

    /// Changes the priority; the owning storage re-sorts on its next refresh.
    pub fn set_priority(&self, priority: u32) {
        self.core.set_priority(priority);
    }

    /// Overrides the delta passed to the action with a fixed virtual delta.
    ///
    /// Real tick time accumulates and the action fires once per `fixed_dt`
    /// consumed, possibly multiple times in one real tick.
    pub fn set_delta(&self, fixed_dt: f64) -> Result<()> {
        if !(fixed_dt.is_finite() && fixed_dt > 0.0) {
            return Err(Error::invalid_duration(fixed_dt));
        }
        self.core.set_fixed_delta(Some(fixed_dt));
        Ok(())
    }

    /// Removes the fixed virtual delta; the action receives real deltas again.
    pub fn reset_delta(&self) {
        self.core.set_fixed_delta(None);
    }

    /// Returns the fixed virtual delta, if set.
    #[must_use]
    pub fn fixed_delta(&self) -> Option<f64> {
        self.core.fixed_delta()
    }

    /// Makes the action fire only every `rate`-th tick.
    ///
    /// A rate of 1 restores every-tick firing. Zero is a usage error.
    pub fn set_tick_rate(&self, rate: u32) -> Result<()> {
        if rate == 0 {
            return Err(Error::new(ErrorKind::InvalidTickRate));
        }
        self.core.set_tick_rate(rate);
        Ok(())
    }

    /// Returns the tick-rate divisor.
    #[must_use]
    pub fn tick_rate(&self) -> u32 {
        self.core.tick_rate()
    }

    /// Cancels the action: cancel callbacks fire synchronously, the action
    /// is removed from its stream on the next refresh and never invoked
    /// again. Idempotent.
    pub fn cancel(&self) {
        self.core.cancel();
    }

    /// Returns true once the action has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    /// Returns true once the action has retired (completed, cancelled, or
    /// its stream disposed).
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.core.is_retired()
    }

    /// Registers a callback fired when the action is cancelled.
    ///
    /// `scope` limits the registration's lifetime: if the scope token has
    /// been released by the time cancellation happens, the callback is
    /// skipped. Pass [`CancelToken::none`] for an unscoped registration.
    /// Fires immediately if the action is already cancelled.
    pub fn on_cancel(&self, callback: impl FnOnce() + Send + 'static, scope: CancelToken) {
        self.core.on_cancel(Box::new(callback), scope);
    }

    /// Registers a callback fired once when the action retires for any
    /// reason. Fires immediately if the action already retired.
    pub fn on_dispose(&self, callback: impl FnOnce() + Send + 'static) {
        self.core.on_dispose(Box::new(callback));
    }
}

impl std::fmt::Debug for ActionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("priority", &self.priority())
            .field("cancelled", &self.is_cancelled())
            .field("retired", &self.is_retired())
            .finish()
    }
}
