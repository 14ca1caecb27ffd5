//! Development-time tracing for debugging the agent.
//!
//! Tracing is diagnostics only, written to stderr and filtered by `RUST_LOG`.
//! The product output is the message stream delivered to observers (console
//! and transcript), which `RUST_LOG` does not affect.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset.
///
/// # Example
/// ```bash
/// RUST_LOG=taskloop=debug taskloop run --goal "Plan a trip"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
