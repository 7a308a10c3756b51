//! Tracing setup shared by the binaries.

use tracing_subscriber::{EnvFilter, fmt};

/// Installs a stderr subscriber. `RUST_LOG` overrides the default `warn`
/// filter. Calling it twice is harmless.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
