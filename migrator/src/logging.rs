//! Tracing setup for the migrator CLI.
//!
//! Every engine component logs through `tracing`; the subscriber installed
//! here is the only sink. Backend output, skipped changesets and recovered
//! failures all show up at `info`/`warn`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG` env var. Defaults to `info` with `verbose`, otherwise
/// `warn`. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=migrator=debug migrator apply --connection mongodb://localhost/app --changelog changelog.toml
/// ```
pub fn init(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
