//! Error types and error handling strategy for tickstream.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Usage errors (illegal API calls) always surface synchronously to the
//!   caller and are never swallowed
//! - Errors raised by user callbacks during a tick are caught per-action,
//!   logged, and confined to the offending action
//! - Cancellation is a status, not an error, except where a continuation
//!   explicitly observes a canceled awaited task

use core::fmt;

/// A specialized result type for scheduler operations.
pub type Result<T> = core::result::Result<T, Error>;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Usage (illegal API calls) ===
    /// `tick` was called re-entrantly from inside an action on the same stream.
    ReentrantTick,
    /// Operation attempted on a disposing or disposed stream.
    StreamDisposed,
    /// Operation attempted on a stream previously marked invalid.
    StreamInvalid,
    /// A duration argument was zero, negative, or not finite.
    InvalidDuration,
    /// A tick-rate divisor of zero was supplied.
    InvalidTickRate,
    /// `Distributor::start` was called while a previous round was in flight.
    DistributorBusy,
    /// A task handle was queried after its source was recycled.
    StaleTaskHandle,

    // === Action / task outcomes ===
    /// A user callback panicked during invocation.
    ActionPanicked,
    /// An awaited task completed with an error.
    TaskFaulted,
    /// The operation was cancelled.
    Cancelled,

    // === Internal ===
    /// Internal scheduler error (bug).
    Internal,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::ReentrantTick
            | Self::StreamDisposed
            | Self::StreamInvalid
            | Self::InvalidDuration
            | Self::InvalidTickRate
            | Self::DistributorBusy
            | Self::StaleTaskHandle => ErrorCategory::Usage,
            Self::ActionPanicked | Self::TaskFaulted => ErrorCategory::Action,
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Returns a static name for this kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ReentrantTick => "reentrant tick",
            Self::StreamDisposed => "stream disposed",
            Self::StreamInvalid => "stream invalid",
            Self::InvalidDuration => "invalid duration",
            Self::InvalidTickRate => "invalid tick rate",
            Self::DistributorBusy => "distributor busy",
            Self::StaleTaskHandle => "stale task handle",
            Self::ActionPanicked => "action panicked",
            Self::TaskFaulted => "task faulted",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Coarse classification of errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Illegal API call; a programming bug in the caller.
    Usage,
    /// Failure raised from a user callback or awaited task.
    Action,
    /// Cooperative cancellation observed as an error.
    Cancellation,
    /// Scheduler-internal invariant violation.
    Internal,
}

/// The error type for scheduler operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
}

impl Error {
    /// Creates an error with the given kind and no message.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Creates an error with the given kind and message.
    #[must_use]
    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the category of this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the optional detail message.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error is a usage error.
    #[must_use]
    pub const fn is_usage(&self) -> bool {
        matches!(self.category(), ErrorCategory::Usage)
    }

    // --- constructor helpers ---

    /// Re-entrant `tick` on the same stream.
    #[must_use]
    pub fn reentrant_tick(stream: &str) -> Self {
        Self::with_message(
            ErrorKind::ReentrantTick,
            format!("stream `{stream}` ticked re-entrantly from one of its own actions"),
        )
    }

    /// Operation on a disposed stream.
    #[must_use]
    pub fn disposed(stream: &str) -> Self {
        Self::with_message(
            ErrorKind::StreamDisposed,
            format!("stream `{stream}` is disposed"),
        )
    }

    /// Operation on an invalid stream.
    #[must_use]
    pub fn invalid(stream: &str) -> Self {
        Self::with_message(
            ErrorKind::StreamInvalid,
            format!("stream `{stream}` was marked invalid by a prior re-entrant tick"),
        )
    }

    /// A non-positive or non-finite duration argument.
    #[must_use]
    pub fn invalid_duration(seconds: f64) -> Self {
        Self::with_message(
            ErrorKind::InvalidDuration,
            format!("duration must be positive and finite, got {seconds}"),
        )
    }

    /// A stale (recycled) task handle was queried.
    #[must_use]
    pub fn stale_task(expected: u32, actual: u32) -> Self {
        Self::with_message(
            ErrorKind::StaleTaskHandle,
            format!("task handle version {expected} does not match source version {actual}"),
        )
    }

    /// Cancellation observed as an error by an awaiting continuation.
    #[must_use]
    pub const fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// A user callback panicked; carries the panic payload text when available.
    #[must_use]
    pub fn panicked(payload: &(dyn std::any::Any + Send)) -> Self {
        let text = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self::with_message(ErrorKind::ActionPanicked, text)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}
