//! Cancellation token and token source.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use smallvec::SmallVec;

type Callback = Box<dyn FnOnce() + Send>;

struct SourceInner {
    released: AtomicBool,
    callbacks: Mutex<SmallVec<[Callback; 4]>>,
}

/// Owner side of a one-shot cooperative cancellation latch.
///
/// A source is created per logical scope (a stream's lifetime, a behaviour's
/// lifetime) and released at most once. Once released it stays released;
/// every future registration fires immediately instead of queuing.
///
/// # Example
///
/// ```
/// use tickstream::cancel::CancelSource;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// let source = CancelSource::new();
/// let token = source.token();
/// let fired = Arc::new(AtomicBool::new(false));
/// let flag = Arc::clone(&fired);
/// token.register(move || flag.store(true, Ordering::SeqCst));
///
/// source.release();
/// assert!(fired.load(Ordering::SeqCst));
/// ```
pub struct CancelSource {
    inner: Arc<SourceInner>,
}

impl CancelSource {
    /// Creates a new, unreleased source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SourceInner {
                released: AtomicBool::new(false),
                callbacks: Mutex::new(SmallVec::new()),
            }),
        }
    }

    /// Returns a token referencing this source.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            inner: Some(Arc::downgrade(&self.inner)),
        }
    }

    /// Returns true once [`release`](Self::release) has been called.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Releases the source, invoking every registered callback in
    /// registration order. Idempotent: only the first call drains.
    ///
    /// Each callback is isolated: a panicking callback is logged and the
    /// remaining callbacks still run.
    pub fn release(&self) {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: SmallVec<[Callback; 4]> = {
            let mut callbacks = self
                .inner
                .callbacks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::take(&mut *callbacks)
        };
        for callback in drained {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(callback)) {
                let err = crate::Error::panicked(payload.as_ref());
                tracing::error!(error = %err, "cancellation callback panicked");
            }
        }
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSource")
            .field("released", &self.is_released())
            .finish()
    }
}

/// Lightweight, copyable handle referencing a [`CancelSource`].
///
/// A token never owns its source. [`CancelToken::none`] is the token with
/// no source: it is never released and registrations against it are
/// discarded.
#[derive(Clone)]
pub struct CancelToken {
    inner: Option<Weak<SourceInner>>,
}

impl CancelToken {
    /// The token with no source; never released.
    #[must_use]
    pub const fn none() -> Self {
        Self { inner: None }
    }

    /// Returns true if this token has an associated source.
    #[must_use]
    pub const fn has_source(&self) -> bool {
        self.inner.is_some()
    }

    /// Returns true if the source has been released.
    ///
    /// A sourceless token, or a token whose source was dropped without
    /// release, reports false.
    #[must_use]
    pub fn is_released(&self) -> bool {
        match &self.inner {
            Some(weak) => weak
                .upgrade()
                .is_some_and(|inner| inner.released.load(Ordering::Acquire)),
            None => false,
        }
    }

    /// Registers a callback to run on release.
    ///
    /// If the source is already released the callback is invoked
    /// immediately, synchronously. If the source was dropped without being
    /// released the callback can never fire and is discarded.
    pub fn register(&self, callback: impl FnOnce() + Send + 'static) {
        let Some(weak) = &self.inner else {
            return;
        };
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.released.load(Ordering::Acquire) {
            callback();
            return;
        }
        let mut callbacks = inner
            .callbacks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // Release may have won the race between the check above and the
        // lock; the drain has already run, so fire immediately.
        if inner.released.load(Ordering::Acquire) {
            drop(callbacks);
            callback();
        } else {
            callbacks.push(Box::new(callback));
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("has_source", &self.has_source())
            .field("released", &self.is_released())
            .finish()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::none()
    }
}
