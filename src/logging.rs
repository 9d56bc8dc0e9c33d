//! Tracing subscriber setup.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install a formatted stderr subscriber filtered by `RUST_LOG` (default `info`).
///
/// Calling this more than once is a no-op after the first successful
/// initialisation.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// As `init_tracing`, with a custom filter used when `RUST_LOG` is unset.
pub fn init_tracing_with_default(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_timer(fmt::time::Uptime::default())
        .with_writer(std::io::stderr)
        .finish()
        .try_init();
}
