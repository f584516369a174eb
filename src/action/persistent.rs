//! Persistent action: fires every eligible tick, never self-terminates.

use crate::action::core::ActionCore;
use crate::action::{ActionCx, Behavior, Step};
use crate::Result;

pub(crate) struct Persistent<F> {
    body: F,
}

impl<F> Persistent<F>
where
    F: FnMut(f64, &mut ActionCx) -> crate::action::Flow + Send,
{
    pub(crate) fn new(body: F) -> Self {
        Self { body }
    }
}

impl<F> Behavior for Persistent<F>
where
    F: FnMut(f64, &mut ActionCx) -> crate::action::Flow + Send,
{
    fn invoke(&mut self, dt: f64, core: &ActionCore) -> Result<Step> {
        for slice in core.deltas(dt) {
            let mut cx = ActionCx::new();
            let _flow = (self.body)(slice, &mut cx);
            if core.apply_sleep(&mut cx) {
                break;
            }
        }
        Ok(Step::Continue)
    }
}
