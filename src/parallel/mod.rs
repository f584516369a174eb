//! Bounded parallel fan-out for per-tick work.
//!
//! Parallel actions are independent, order-insensitive per-frame work.
//! Each tick the stream snapshots its parallel live list and starts a
//! distributor round over it; a fixed pool of background workers claims
//! indices from a shared atomic cursor, and the tick thread joins the
//! round's barrier before the tick is considered complete — parallel
//! actions never outlive their tick.

pub(crate) mod distributor;
pub(crate) mod pool;

pub(crate) use distributor::Distributor;
pub(crate) use pool::WorkerPool;

use std::sync::Arc;

use crate::action::core::ActionCore;
use crate::storage::Entry;

/// A live parallel action: shared scheduling state plus a thread-safe body.
pub(crate) struct ParallelEntry {
    pub(crate) core: Arc<ActionCore>,
    body: Box<dyn Fn(f64) + Send + Sync>,
}

impl ParallelEntry {
    pub(crate) fn new(core: Arc<ActionCore>, body: Box<dyn Fn(f64) + Send + Sync>) -> Self {
        Self { core, body }
    }

    /// Invokes the body with this tick's pacing applied. Runs on a worker
    /// thread; the body must not touch stream state.
    pub(crate) fn invoke(&self, dt: f64) {
        if self.core.is_cancelled() || self.core.is_retired() {
            return;
        }
        for slice in self.core.deltas(dt) {
            (self.body)(slice);
        }
    }
}

impl Entry for Arc<ParallelEntry> {
    fn core(&self) -> &Arc<ActionCore> {
        &self.core
    }
}
