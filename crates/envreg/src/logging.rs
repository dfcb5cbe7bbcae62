//! Subscriber setup for binaries and tests embedding the registry.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a global subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `default_filter`. Records emitted through
/// the `log` facade are forwarded to the subscriber. Returns `false` when a
/// global subscriber was already installed, which leaves it in place.
pub fn init_logging(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}
