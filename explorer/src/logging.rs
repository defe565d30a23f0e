//! Diagnostic tracing for the explorer.
//!
//! Output goes to stderr and is controlled by `RUST_LOG`. The CLI's phase and
//! progress lines are product output and are printed regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. `verbose` overrides the default with
/// `explorer=debug` when `RUST_LOG` is unset.
///
/// # Example
/// ```bash
/// RUST_LOG=explorer::io::client=info explorer explore --tree t1 --host h --device d
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "explorer=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
