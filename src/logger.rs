// Stepwright: Structured logging via tracing

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Log level is controlled by the `STEPWRIGHT_LOG` env var, falling back to
/// `default_level` when it is unset.
/// Examples:
///   STEPWRIGHT_LOG=debug
///   STEPWRIGHT_LOG=stepwright::remote=trace,info
pub fn init_with_default(default_level: &str) {
    let filter = EnvFilter::try_from_env("STEPWRIGHT_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Initialize logger for tests (does not panic if called multiple times).
#[cfg(test)]
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
