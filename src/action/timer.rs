//! Timer action: a pure delay with a completion callback.

use crate::action::core::ActionCore;
use crate::action::{Behavior, Step, TIME_EPSILON};
use crate::Result;

pub(crate) struct Timer<F> {
    remaining: f64,
    on_complete: Option<F>,
}

impl<F> Timer<F>
where
    F: FnOnce() + Send,
{
    pub(crate) fn new(duration: f64, on_complete: F) -> Self {
        Self {
            remaining: duration,
            on_complete: Some(on_complete),
        }
    }
}

impl<F> Behavior for Timer<F>
where
    F: FnOnce() + Send,
{
    fn invoke(&mut self, dt: f64, _core: &ActionCore) -> Result<Step> {
        // A timer counts real tick time; pacing overrides do not apply.
        self.remaining -= dt;
        if self.remaining > TIME_EPSILON {
            return Ok(Step::Continue);
        }
        if let Some(callback) = self.on_complete.take() {
            callback();
        }
        Ok(Step::Done)
    }
}
