use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;

/// Installs a pretty stdout subscriber for the crate's tracing events.
/// Safe to call more than once; later calls are ignored.
pub fn init(level: LevelFilter) {
    let stdout_log = tracing_subscriber::fmt::layer().pretty();

    tracing_subscriber::registry()
        .with(stdout_log.with_filter(level))
        .try_init()
        .ok();
}
