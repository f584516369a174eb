//! Cooperative one-shot cancellation.
//!
//! Cancellation is a protocol, not a silent drop: releasing a
//! [`CancelSource`] flips a latch exactly once, drains every registered
//! callback synchronously, and marks pending awaitables Canceled. Tokens
//! are cheap, copyable handles that never own their source.

mod token;

pub use token::{CancelSource, CancelToken};
