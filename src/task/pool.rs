//! Type-keyed free list of completion cells.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::task::cell::TaskCell;
use crate::task::{Task, TaskSource};

/// Free list of recycled completion cells, keyed by result type.
///
/// Owned by one runtime instance — no process-global state. Completion
/// pushes cells here; [`acquire`](TaskPool::acquire) pops one, resets it,
/// and bumps its version, invalidating any handle kept from the previous
/// completion window.
pub(crate) struct TaskPool {
    me: std::sync::Weak<TaskPool>,
    free: Mutex<HashMap<TypeId, Vec<Box<dyn Any + Send>>>>,
}

impl TaskPool {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            free: Mutex::new(HashMap::new()),
        })
    }

    /// Acquires a source/task pair for a fresh completion window.
    pub(crate) fn acquire<T: Send + 'static>(&self) -> (TaskSource<T>, Task<T>) {
        let recycled: Option<Arc<TaskCell<T>>> = {
            let mut free = self
                .free
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            free.get_mut(&TypeId::of::<T>())
                .and_then(Vec::pop)
                .and_then(|boxed| boxed.downcast::<Arc<TaskCell<T>>>().ok())
                .map(|arc| *arc)
        };
        let cell = recycled.unwrap_or_else(|| Arc::new(TaskCell::new()));
        let version = cell.reset();
        (
            TaskSource::new(Arc::clone(&cell), version, self.me.clone()),
            Task::new(cell, version),
        )
    }

    /// Returns a completed cell to the free list. The version is bumped on
    /// the next acquisition, not here, so handles from the finished window
    /// stay queryable until the cell is reused.
    pub(crate) fn recycle<T: Send + 'static>(&self, cell: Arc<TaskCell<T>>) {
        let mut free = self
            .free
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        free.entry(TypeId::of::<T>())
            .or_default()
            .push(Box::new(cell));
    }

    #[cfg(test)]
    pub(crate) fn free_count<T: Send + 'static>(&self) -> usize {
        self.free
            .lock()
            .unwrap()
            .get(&TypeId::of::<T>())
            .map_or(0, Vec::len)
    }
}
