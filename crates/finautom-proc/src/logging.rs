//! Shared tracing setup for the three binaries.

use tracing_subscriber::EnvFilter;

/// Install the process-wide subscriber. Logs go to stderr so the report
/// blocks on stdout stay machine-readable; `RUST_LOG` overrides the
/// verbosity chosen by `-v`.
pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
