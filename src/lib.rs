//! Tickstream: frame-driven cooperative task scheduler.
//!
//! # Overview
//!
//! A host application drives one or more [`ExecutionStream`]s by calling
//! [`ExecutionStream::tick`] once per frame, fixed step, or late-update
//! phase with the elapsed time. Each tick runs the stream's prioritized
//! actions: sequential actions deterministically on the calling thread,
//! parallel actions fanned out across a bounded worker pool and joined
//! before the tick completes.
//!
//! # Core Guarantees
//!
//! - **Deterministic ordering**: sequential actions run by ascending
//!   priority, ties broken by creation order, stable across ticks
//! - **Tick isolation**: actions added during a tick first run on the next
//!   tick; parallel work never outlives its tick
//! - **Confinement**: an action that errors or panics is logged and
//!   removed; siblings and the tick are unaffected
//! - **Cooperative cancellation**: releasing a token is synchronous and
//!   one-shot; no new invocation is observed after release
//! - **Tick-resumed awaiting**: a task continuation resumes on a later
//!   tick of the stream that suspended, never on a pool callback
//!
//! # Module Structure
//!
//! - [`runtime`]: the scheduler runtime owning pools and shared state
//! - [`stream`]: execution streams and managed child streams
//! - [`action`]: action variants and handles
//! - [`cancel`]: cooperative cancellation tokens
//! - [`task`]: pooled awaitable machinery and combinators
//! - [`config`]: runtime configuration and fan-out strategies
//! - [`error`]: error types
//!
//! # Example
//!
//! ```
//! use tickstream::action::Flow;
//! use tickstream::cancel::CancelToken;
//! use tickstream::runtime::Runtime;
//!
//! let runtime = Runtime::new();
//! let stream = runtime.stream("main");
//!
//! // Fires every tick until cancelled.
//! let handle = stream
//!     .add(
//!         |dt, _cx| {
//!             let _ = dt;
//!             Flow::next()
//!         },
//!         CancelToken::none(),
//!         0,
//!     )
//!     .unwrap();
//!
//! // Fires once, one second of tick time from now.
//! stream.add_timer(1.0, || {}, CancelToken::none()).unwrap();
//!
//! stream.tick(0.016).unwrap();
//! handle.cancel();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::float_cmp)]

pub mod action;
pub mod cancel;
pub mod config;
pub mod error;
pub mod runtime;
pub mod stream;
pub mod task;

pub(crate) mod parallel;
pub(crate) mod storage;

// Re-exports for convenient access to core types
pub use action::{ActionCx, ActionHandle, CoroStep, Flow};
pub use cancel::{CancelSource, CancelToken};
pub use config::{ParallelWorkStrategy, SchedulerConfig};
pub use error::{Error, ErrorCategory, ErrorKind, Result};
pub use runtime::Runtime;
pub use stream::{ExecutionStream, LockMode, ManagedStream, StreamLock, StreamState};
pub use task::{Completion, Task, TaskSource, TaskStatus};
