//! Coroutine-style action: advances a restartable step function once per
//! visited tick.

use crate::action::core::ActionCore;
use crate::action::{Behavior, Step};
use crate::Result;

/// Result of one coroutine step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroStep {
    /// The step function has more work; advance again next tick.
    Yield,
    /// The step function is exhausted; the action completes.
    Complete,
}

pub(crate) struct Coroutine<F> {
    step: F,
}

impl<F> Coroutine<F>
where
    F: FnMut(f64) -> CoroStep + Send,
{
    pub(crate) fn new(step: F) -> Self {
        Self { step }
    }
}

impl<F> Behavior for Coroutine<F>
where
    F: FnMut(f64) -> CoroStep + Send,
{
    fn invoke(&mut self, dt: f64, core: &ActionCore) -> Result<Step> {
        if !core.tick_gate(dt) {
            return Ok(Step::Continue);
        }
        match (self.step)(dt) {
            CoroStep::Yield => Ok(Step::Continue),
            CoroStep::Complete => Ok(Step::Done),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_one_step_per_tick_until_exhausted() {
        let mut counter = 0;
        let mut action = Coroutine::new(move |_dt| {
            counter += 1;
            if counter >= 3 {
                CoroStep::Complete
            } else {
                CoroStep::Yield
            }
        });
        let core = ActionCore::new(1, "coroutine".to_string(), 0);

        assert_eq!(action.invoke(0.1, &core).unwrap(), Step::Continue);
        assert_eq!(action.invoke(0.1, &core).unwrap(), Step::Continue);
        assert_eq!(action.invoke(0.1, &core).unwrap(), Step::Done);
    }

    #[test]
    fn tick_rate_gates_steps() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let steps = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&steps);
        let mut action = Coroutine::new(move |_dt| {
            s.fetch_add(1, Ordering::SeqCst);
            CoroStep::Yield
        });
        let core = ActionCore::new(1, "coroutine".to_string(), 0);
        core.set_tick_rate(2);

        assert_eq!(action.invoke(0.1, &core).unwrap(), Step::Continue);
        assert_eq!(action.invoke(0.1, &core).unwrap(), Step::Continue);
        // Only the second tick passed the gate.
        assert_eq!(steps.load(Ordering::SeqCst), 1);
    }
}
