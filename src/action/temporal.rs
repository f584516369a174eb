//! Temporal action: persistent semantics bounded by a total duration.

use crate::action::core::ActionCore;
use crate::action::{ActionCx, Behavior, Step, TIME_EPSILON};
use crate::Result;

pub(crate) struct Temporal<F> {
    body: F,
    remaining: f64,
}

impl<F> Temporal<F>
where
    F: FnMut(f64, &mut ActionCx) -> crate::action::Flow + Send,
{
    pub(crate) fn new(duration: f64, body: F) -> Self {
        Self {
            body,
            remaining: duration,
        }
    }
}

impl<F> Behavior for Temporal<F>
where
    F: FnMut(f64, &mut ActionCx) -> crate::action::Flow + Send,
{
    fn invoke(&mut self, dt: f64, core: &ActionCore) -> Result<Step> {
        for slice in core.deltas(dt) {
            // The last fire is clipped so total consumed time equals the
            // configured duration exactly.
            let slice = slice.min(self.remaining);
            let mut cx = ActionCx::new();
            let _flow = (self.body)(slice, &mut cx);
            self.remaining -= slice;
            let slept = core.apply_sleep(&mut cx);
            if self.remaining <= TIME_EPSILON {
                return Ok(Step::Done);
            }
            if slept {
                break;
            }
        }
        Ok(Step::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn core() -> ActionCore {
        ActionCore::new(1, "temporal".to_string(), 0)
    }

    #[test]
    fn fires_until_duration_consumed_then_completes() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let mut action = Temporal::new(0.3, move |_dt, _cx| {
            c.fetch_add(1, Ordering::SeqCst);
            crate::action::Flow::next()
        });
        let core = core();

        assert_eq!(action.invoke(0.1, &core).unwrap(), Step::Continue);
        assert_eq!(action.invoke(0.1, &core).unwrap(), Step::Continue);
        assert_eq!(action.invoke(0.1, &core).unwrap(), Step::Done);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn final_fire_is_clipped_to_remaining_time() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let mut action = Temporal::new(0.25, move |dt, _cx| {
            log.lock().unwrap().push(dt);
            crate::action::Flow::next()
        });
        let core = core();

        assert_eq!(action.invoke(0.2, &core).unwrap(), Step::Continue);
        assert_eq!(action.invoke(0.2, &core).unwrap(), Step::Done);
        let log = seen.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert!((log[0] - 0.2).abs() < 1e-9);
        assert!((log[1] - 0.05).abs() < 1e-9);
    }

    #[test]
    fn fixed_delta_drain_is_bounded_by_remaining() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let mut action = Temporal::new(0.2, move |_dt, _cx| {
            c.fetch_add(1, Ordering::SeqCst);
            crate::action::Flow::next()
        });
        let core = core();
        core.set_fixed_delta(Some(0.1));

        // One real tick covering 0.5s would drain five slices, but the
        // duration only covers two.
        assert_eq!(action.invoke(0.5, &core).unwrap(), Step::Done);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
