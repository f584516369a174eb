//! Managed streams: child streams with runtime-adjustable priority,
//! lock gating, re-parenting, and merging.
//!
//! A managed stream is an ordinary [`ExecutionStream`] subscribed into a
//! parent through a conditional action: every parent tick forwards the
//! delta to the child unless the child is lock-gated, and the subscription
//! expires by itself once the child is disposed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::action::{ActionHandle, Flow};
use crate::cancel::CancelToken;
use crate::stream::{ExecutionStream, StreamState};
use crate::Result;

/// How lock tokens gate a managed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Blocked while at least one locker is active; every locker must
    /// release before the stream runs again.
    WhenAll,
    /// Blocked while lockers are active, but the first release clears the
    /// whole set.
    WhenAny,
}

/// A lock token issued by [`ManagedStream::lock`].
#[derive(Debug)]
pub struct StreamLock {
    id: u64,
}

struct LockSet {
    mode: LockMode,
    active: Mutex<HashSet<u64>>,
    next_id: AtomicU64,
}

impl LockSet {
    fn new(mode: LockMode) -> Self {
        Self {
            mode,
            active: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn acquire(&self) -> StreamLock {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id);
        StreamLock { id }
    }

    fn release(&self, lock: &StreamLock) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match self.mode {
            LockMode::WhenAll => {
                active.remove(&lock.id);
            }
            LockMode::WhenAny => {
                // Any single release unlocks the stream.
                if active.remove(&lock.id) {
                    active.clear();
                }
            }
        }
    }

    fn is_clear(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_empty()
    }
}

/// A child stream driven by a parent stream's ticks.
pub struct ManagedStream {
    stream: ExecutionStream,
    locks: Arc<LockSet>,
    subscription: Mutex<Option<ActionHandle>>,
    parent: Mutex<ExecutionStream>,
}

impl ManagedStream {
    /// Creates a child stream subscribed into `parent` at the given
    /// priority among the parent's actions.
    pub fn new(
        parent: &ExecutionStream,
        name: impl Into<String>,
        mode: LockMode,
        priority: u32,
    ) -> Result<Self> {
        let stream = ExecutionStream::new(
            Arc::clone(parent.runtime()),
            name.into(),
            parent.strategy(),
        );
        let locks = Arc::new(LockSet::new(mode));
        let subscription = Self::subscribe(parent, &stream, &locks, priority)?;
        Ok(Self {
            stream,
            locks,
            subscription: Mutex::new(Some(subscription)),
            parent: Mutex::new(parent.clone()),
        })
    }

    fn subscribe(
        parent: &ExecutionStream,
        child: &ExecutionStream,
        locks: &Arc<LockSet>,
        priority: u32,
    ) -> Result<ActionHandle> {
        let alive = child.clone();
        let ticked = child.clone();
        let gate = Arc::clone(locks);
        parent.add_conditional(
            move || !alive.is_disposed(),
            move |dt, _cx| {
                if gate.is_clear() {
                    if let Err(err) = ticked.tick(dt) {
                        tracing::error!(
                            stream = %ticked.name(),
                            error = %err,
                            "managed stream tick failed",
                        );
                    }
                }
                Flow::next()
            },
            CancelToken::none(),
            priority,
        )
    }

    /// The underlying stream; schedule actions through this.
    #[must_use]
    pub fn stream(&self) -> &ExecutionStream {
        &self.stream
    }

    /// Returns the subscription priority within the parent.
    #[must_use]
    pub fn priority(&self) -> u32 {
        self.with_subscription(ActionHandle::priority).unwrap_or(0)
    }

    /// Changes the subscription priority; the parent re-sorts on its next
    /// refresh.
    pub fn set_priority(&self, priority: u32) {
        let _ = self.with_subscription(|sub| sub.set_priority(priority));
    }

    /// Makes the subscription fire only every `rate`-th parent tick.
    pub fn set_tick_rate(&self, rate: u32) -> Result<()> {
        self.with_subscription(|sub| sub.set_tick_rate(rate))
            .unwrap_or(Ok(()))
    }

    /// Gives the subscription a fixed virtual delta.
    pub fn set_delta(&self, fixed_dt: f64) -> Result<()> {
        self.with_subscription(|sub| sub.set_delta(fixed_dt))
            .unwrap_or(Ok(()))
    }

    /// Acquires a lock token gating this stream.
    ///
    /// While the stream is locked its subscription skips ticking it, even
    /// if it has pending actions.
    #[must_use]
    pub fn lock(&self) -> StreamLock {
        self.locks.acquire()
    }

    /// Releases a lock token. Under [`LockMode::WhenAny`] the first release
    /// clears every outstanding locker.
    pub fn unlock(&self, lock: &StreamLock) {
        self.locks.release(lock);
    }

    /// Returns true if the stream would run on the parent's next tick.
    #[must_use]
    pub fn can_execute(&self) -> bool {
        self.locks.is_clear() && !matches!(self.stream.state(), StreamState::Disposed)
    }

    /// Detaches from the current parent and resubscribes to `new_parent`,
    /// preserving the subscription's priority, tick-rate, and fixed-delta
    /// settings.
    pub fn reparent(&self, new_parent: &ExecutionStream) -> Result<()> {
        let (priority, tick_rate, fixed_delta) = {
            let subscription = self
                .subscription
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            match subscription.as_ref() {
                Some(sub) => (sub.priority(), sub.tick_rate(), sub.fixed_delta()),
                None => (0, 1, None),
            }
        };

        let replacement = Self::subscribe(new_parent, &self.stream, &self.locks, priority)?;
        replacement.set_tick_rate(tick_rate)?;
        if let Some(delta) = fixed_delta {
            replacement.set_delta(delta)?;
        }

        let old = {
            let mut subscription = self
                .subscription
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            subscription.replace(replacement)
        };
        if let Some(old) = old {
            old.cancel();
        }
        *self
            .parent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = new_parent.clone();
        Ok(())
    }

    /// Merges `other`'s actions and dispose callbacks into this stream and
    /// disposes `other`. Must not be called while either stream is
    /// mid-tick.
    pub fn absorb(&self, other: ManagedStream) {
        other.detach();
        self.stream.absorb(&other.stream);
    }

    /// Disposes the child stream; the subscription expires on the parent's
    /// next tick.
    pub fn dispose(&self) {
        self.detach();
        self.stream.dispose();
    }

    fn detach(&self) {
        let old = self
            .subscription
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(sub) = old {
            sub.cancel();
        }
    }

    fn with_subscription<R>(&self, f: impl FnOnce(&ActionHandle) -> R) -> Option<R> {
        self.subscription
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .map(f)
    }
}

impl std::fmt::Debug for ManagedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedStream")
            .field("stream", &self.stream)
            .field("locked", &!self.locks.is_clear())
            .finish()
    }
}

/// Joins two managed streams: the one whose subscription priority is lower
/// (runs earlier) survives and absorbs the other.
pub fn join(a: ManagedStream, b: ManagedStream) -> ManagedStream {
    if a.priority() <= b.priority() {
        a.absorb(b);
        a
    } else {
        b.absorb(a);
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::runtime::Runtime;
    use std::sync::atomic::AtomicUsize;

    fn runtime() -> Runtime {
        Runtime::with_config(SchedulerConfig::new().with_worker_threads(1))
    }

    fn count_action(stream: &ExecutionStream, count: &Arc<AtomicUsize>) {
        let c = Arc::clone(count);
        stream
            .add(
                move |_dt, _cx| {
                    c.fetch_add(1, Ordering::SeqCst);
                    Flow::next()
                },
                CancelToken::none(),
                0,
            )
            .unwrap();
    }

    #[test]
    fn child_ticks_with_parent() {
        let rt = runtime();
        let parent = rt.stream("parent");
        let child = ManagedStream::new(&parent, "child", LockMode::WhenAll, 0).unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        count_action(child.stream(), &count);

        parent.tick(0.1).unwrap();
        parent.tick(0.1).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn when_all_lock_requires_every_release() {
        let rt = runtime();
        let parent = rt.stream("parent");
        let child = ManagedStream::new(&parent, "child", LockMode::WhenAll, 0).unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        count_action(child.stream(), &count);
        parent.tick(0.1).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let first = child.lock();
        let second = child.lock();
        parent.tick(0.1).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        child.unlock(&first);
        parent.tick(0.1).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        child.unlock(&second);
        parent.tick(0.1).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn when_any_lock_clears_on_first_release() {
        let rt = runtime();
        let parent = rt.stream("parent");
        let child = ManagedStream::new(&parent, "child", LockMode::WhenAny, 0).unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        count_action(child.stream(), &count);

        let first = child.lock();
        let _second = child.lock();
        parent.tick(0.1).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        child.unlock(&first);
        parent.tick(0.1).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reparent_preserves_settings() {
        let rt = runtime();
        let old_parent = rt.stream("old");
        let new_parent = rt.stream("new");
        let child = ManagedStream::new(&old_parent, "child", LockMode::WhenAll, 7).unwrap();
        child.set_tick_rate(2).unwrap();

        child.reparent(&new_parent).unwrap();
        assert_eq!(child.priority(), 7);

        let count = Arc::new(AtomicUsize::new(0));
        count_action(child.stream(), &count);

        // Old parent no longer drives the child.
        old_parent.tick(0.1).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // Tick-rate 2 survived the move: only every second tick fires.
        new_parent.tick(0.1).unwrap();
        new_parent.tick(0.1).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn disposed_child_expires_its_subscription() {
        let rt = runtime();
        let parent = rt.stream("parent");
        let child = ManagedStream::new(&parent, "child", LockMode::WhenAll, 0).unwrap();

        child.dispose();
        assert!(!child.can_execute());
        // The parent keeps ticking without errors.
        parent.tick(0.1).unwrap();
        parent.tick(0.1).unwrap();
    }

    #[test]
    fn join_keeps_the_earlier_priority_stream() {
        let rt = runtime();
        let parent = rt.stream("parent");
        let a = ManagedStream::new(&parent, "a", LockMode::WhenAll, 1).unwrap();
        let b = ManagedStream::new(&parent, "b", LockMode::WhenAll, 5).unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        count_action(b.stream(), &count);

        let survivor = join(a, b);
        assert_eq!(survivor.priority(), 1);

        // The action migrated into the survivor.
        parent.tick(0.1).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
