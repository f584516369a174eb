//! Conditional action: fires while a predicate holds, completes on the
//! first tick the predicate is false.

use crate::action::core::ActionCore;
use crate::action::{ActionCx, Behavior, Step};
use crate::Result;

pub(crate) struct Conditional<P, F> {
    predicate: P,
    body: F,
}

impl<P, F> Conditional<P, F>
where
    P: FnMut() -> bool + Send,
    F: FnMut(f64, &mut ActionCx) -> crate::action::Flow + Send,
{
    pub(crate) fn new(predicate: P, body: F) -> Self {
        Self { predicate, body }
    }
}

impl<P, F> Behavior for Conditional<P, F>
where
    P: FnMut() -> bool + Send,
    F: FnMut(f64, &mut ActionCx) -> crate::action::Flow + Send,
{
    fn invoke(&mut self, dt: f64, core: &ActionCore) -> Result<Step> {
        let deltas = core.deltas(dt);
        if deltas.is_empty() {
            // Gated ticks (tick-rate, sleep) do not evaluate the predicate.
            return Ok(Step::Continue);
        }
        if !(self.predicate)() {
            return Ok(Step::Done);
        }
        for slice in deltas {
            let mut cx = ActionCx::new();
            let _flow = (self.body)(slice, &mut cx);
            if core.apply_sleep(&mut cx) {
                break;
            }
        }
        Ok(Step::Continue)
    }
}
