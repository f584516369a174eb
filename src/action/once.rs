//! Once action: a zero-duration callback fired exactly one time.

use crate::action::core::ActionCore;
use crate::action::{Behavior, Step};
use crate::error::{Error, ErrorKind};
use crate::Result;

pub(crate) struct Once<F> {
    callback: Option<F>,
}

impl<F> Once<F>
where
    F: FnOnce() + Send,
{
    pub(crate) fn new(callback: F) -> Self {
        Self {
            callback: Some(callback),
        }
    }
}

impl<F> Behavior for Once<F>
where
    F: FnOnce() + Send,
{
    fn invoke(&mut self, _dt: f64, _core: &ActionCore) -> Result<Step> {
        // Pacing does not apply: a once action fires on its first visited
        // tick regardless of tick-rate or fixed-delta settings.
        let callback = self
            .callback
            .take()
            .ok_or_else(|| Error::with_message(ErrorKind::Internal, "once action invoked twice"))?;
        callback();
        Ok(Step::Done)
    }
}
