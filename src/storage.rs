//! Action storage: pending add/remove queues feeding a lazily re-sorted
//! live list.
//!
//! A storage never mutates its live list while a tick iterates it. Adds go
//! through a pending queue shared with the owning stream; removals are
//! signaled by the actions themselves through a [`StorageSignals`] block
//! (completion and cancellation push the action's id, priority changes mark
//! the sort dirty). [`Storage::refresh`] reconciles everything at the start
//! of the next tick, and re-sorts only when something changed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::action::core::ActionCore;

/// Signal block shared between a storage and its actions.
pub(crate) struct StorageSignals {
    dirty: AtomicBool,
    removals: Mutex<Vec<u64>>,
}

impl StorageSignals {
    fn new() -> Self {
        Self {
            dirty: AtomicBool::new(false),
            removals: Mutex::new(Vec::new()),
        }
    }

    /// Marks the sort order stale (a priority changed).
    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Schedules an action for removal by identity.
    pub(crate) fn push_removal(&self, id: u64) {
        self.removals
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(id);
    }
}

/// An entry a storage can hold: anything exposing its [`ActionCore`].
pub(crate) trait Entry {
    fn core(&self) -> &Arc<ActionCore>;
}

impl Entry for crate::action::LiveAction {
    fn core(&self) -> &Arc<ActionCore> {
        &self.core
    }
}

/// Pending-add queue, shared between a storage and the stream's scheduling
/// calls so that adding during a tick never touches the live list.
pub(crate) type PendingQueue<E> = Arc<Mutex<Vec<E>>>;

/// Enqueues an entry, idempotent per action identity before a refresh.
pub(crate) fn push_pending<E: Entry>(pending: &PendingQueue<E>, entry: E) {
    let mut queue = pending
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let id = entry.core().id();
    if queue.iter().any(|existing| existing.core().id() == id) {
        return;
    }
    queue.push(entry);
}

/// The live, sorted sequence of actions plus its reconciliation queues.
pub(crate) struct Storage<E: Entry> {
    signals: Arc<StorageSignals>,
    pending: PendingQueue<E>,
    live: Vec<E>,
}

impl<E: Entry> Storage<E> {
    pub(crate) fn new() -> Self {
        Self {
            signals: Arc::new(StorageSignals::new()),
            pending: Arc::new(Mutex::new(Vec::new())),
            live: Vec::new(),
        }
    }

    pub(crate) fn pending(&self) -> PendingQueue<E> {
        Arc::clone(&self.pending)
    }

    pub(crate) fn live(&self) -> &[E] {
        &self.live
    }

    pub(crate) fn live_mut(&mut self) -> &mut [E] {
        &mut self.live
    }

    /// Reconciles pending adds and removals into the live list, then
    /// re-sorts by `(priority, id)` — only if something changed.
    pub(crate) fn refresh(&mut self) {
        let mut dirty = self.signals.dirty.swap(false, Ordering::AcqRel);

        {
            let mut pending = self
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if !pending.is_empty() {
                for entry in pending.drain(..) {
                    entry
                        .core()
                        .bind_storage(Arc::downgrade(&self.signals));
                    self.live.push(entry);
                }
                dirty = true;
            }
        }

        let removals: Vec<u64> = {
            let mut removals = self
                .signals
                .removals
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::take(&mut *removals)
        };
        let doomed: HashSet<u64> = removals.into_iter().collect();
        let before = self.live.len();
        // The retired flag is authoritative: it also catches entries whose
        // removal signal was routed to a previous storage before a merge.
        self.live
            .retain(|entry| !doomed.contains(&entry.core().id()) && !entry.core().is_retired());
        if self.live.len() != before {
            dirty = true;
        }

        if dirty {
            self.sort();
        }
    }

    /// Bulk-merges another storage's entries (live and pending) into this
    /// one, re-homing their signal backlinks, followed by one sort.
    pub(crate) fn copy_from(&mut self, other: &mut Self) {
        other.refresh();
        for entry in other.live.drain(..) {
            entry
                .core()
                .bind_storage(Arc::downgrade(&self.signals));
            let id = entry.core().id();
            if !self.live.iter().any(|e| e.core().id() == id) {
                self.live.push(entry);
            }
        }
        self.sort();
    }

    /// Retires every entry (live and pending) and empties the storage.
    /// Used on stream dispose.
    pub(crate) fn clear(&mut self) {
        let pending: Vec<E> = {
            let mut queue = self
                .pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::take(&mut *queue)
        };
        for entry in pending.iter().chain(self.live.iter()) {
            entry.core().retire();
        }
        self.live.clear();
        self.signals
            .removals
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
        self.signals.dirty.store(false, Ordering::Release);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.live.len()
    }

    fn sort(&mut self) {
        self.live
            .sort_by_key(|entry| (entry.core().priority(), entry.core().id()));
    }

    /// Weak handle used by streams to keep scheduling decoupled from the
    /// storage lock held during iteration.
    pub(crate) fn signals_weak(&self) -> Weak<StorageSignals> {
        Arc::downgrade(&self.signals)
    }
}
