//! Shared test helpers.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a compact tracing subscriber once per test binary.
/// `RUST_LOG` overrides the default `warn` filter.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}
