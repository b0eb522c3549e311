//! Tracing setup for the binary.
//!
//! Logs go to stderr so that command output on stdout (including `--json`)
//! stays machine-readable. `RUST_LOG` overrides the default level.
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global subscriber. `default_level` applies when `RUST_LOG`
/// is unset or invalid. A second call is a no-op.
pub fn init_tracing(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init();
}
