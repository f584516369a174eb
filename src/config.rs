//! Scheduler configuration.
//!
//! [`SchedulerConfig`] controls worker-pool sizing and the default parallel
//! work strategy for streams created from a runtime. All values have
//! conservative defaults; use the `with_*` builders to override.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Sizing strategy for the per-tick parallel fan-out.
///
/// The strategy maps the number of parallel actions `n` to a worker count,
/// clamped to the pool's thread count:
///
/// | Strategy | Worker count |
/// |----------|--------------|
/// | `Economy` | `clamp(ln n, 1, threads)` |
/// | `Optimal` | `clamp(sqrt n, 1, threads)` |
/// | `Performance` | `min(n, threads)` |
///
/// The strategy is read at the start of each tick, so changes take effect
/// on the next fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ParallelWorkStrategy {
    /// Logarithmic worker growth; minimizes thread wake-ups.
    Economy,
    /// Square-root worker growth; balances throughput and overhead.
    #[default]
    Optimal,
    /// One worker per action up to the pool size; maximum throughput.
    Performance,
}

impl ParallelWorkStrategy {
    /// Computes the worker count for `iterations` parallel actions given
    /// `available` pool threads.
    ///
    /// Returns 0 when `iterations` is 0: an empty fan-out spawns no workers.
    #[must_use]
    pub fn worker_count(self, iterations: usize, available: usize) -> usize {
        if iterations == 0 || available == 0 {
            return 0;
        }
        match self {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            Self::Economy => ((iterations as f64).ln() as usize).clamp(1, available),
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            Self::Optimal => ((iterations as f64).sqrt() as usize).clamp(1, available),
            Self::Performance => iterations.min(available),
        }
    }
}

/// Error parsing a [`ParallelWorkStrategy`] from text.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown parallel work strategy `{input}` (expected economy, optimal, or performance)")]
pub struct ParseStrategyError {
    /// The rejected input.
    pub input: String,
}

impl std::str::FromStr for ParallelWorkStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "economy" => Ok(Self::Economy),
            "optimal" => Ok(Self::Optimal),
            "performance" => Ok(Self::Performance),
            _ => Err(ParseStrategyError {
                input: s.to_string(),
            }),
        }
    }
}

/// Configuration for a scheduler [`Runtime`](crate::runtime::Runtime).
///
/// # Example
///
/// ```
/// use tickstream::config::{ParallelWorkStrategy, SchedulerConfig};
///
/// let config = SchedulerConfig::new()
///     .with_worker_threads(4)
///     .with_default_strategy(ParallelWorkStrategy::Performance)
///     .with_thread_name_prefix("game");
/// assert_eq!(config.worker_threads(), Some(4));
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SchedulerConfig {
    /// Worker pool size; `None` uses `std::thread::available_parallelism()`.
    worker_threads: Option<usize>,
    /// Default fan-out strategy for new streams.
    default_strategy: ParallelWorkStrategy,
    /// Prefix for worker thread names.
    thread_name_prefix: String,
}

impl SchedulerConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            worker_threads: None,
            default_strategy: ParallelWorkStrategy::default(),
            thread_name_prefix: "tickstream".to_string(),
        }
    }

    /// Sets an explicit worker pool size.
    #[must_use]
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads.max(1));
        self
    }

    /// Sets the default parallel work strategy for new streams.
    #[must_use]
    pub fn with_default_strategy(mut self, strategy: ParallelWorkStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Returns the configured worker thread count, if any.
    #[must_use]
    pub const fn worker_threads(&self) -> Option<usize> {
        self.worker_threads
    }

    /// Returns the default strategy.
    #[must_use]
    pub const fn default_strategy(&self) -> ParallelWorkStrategy {
        self.default_strategy
    }

    /// Returns the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(&self) -> &str {
        &self.thread_name_prefix
    }

    /// Resolves the effective worker pool size.
    #[must_use]
    pub fn resolved_worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1)
        })
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}
