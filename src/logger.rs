//! Structured logging setup

use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. `RUST_LOG` wins over `level` when set.
pub fn init_logger(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .try_init();
}
