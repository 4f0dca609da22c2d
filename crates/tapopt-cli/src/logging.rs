use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "TAPOPT_LOG";

/// Filter from `TAPOPT_LOG`, then `RUST_LOG`, then the `--log-level` flag.
pub fn env_filter(fallback: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::default().add_directive(fallback.into()))
}

/// Install the global subscriber. Logs go to stderr so stdout stays parseable.
pub fn init_logging(fallback: Level) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(fallback))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
