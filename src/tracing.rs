//! Tracing (logging)

use crate::cli::CommandLineArgs;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initlialise tracing (logging)
///
/// Applies a filter based on the `RUST_LOG` environment variable, falling back to info logging
/// for this crate if not set.
///
/// Inside Lambda the output is plain text without timestamps, which the platform adds. Local runs
/// log to stderr, leaving stdout for the run summary.
pub fn init_tracing(args: &CommandLineArgs) {
    let registry = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "ingest_lambda=info".into()),
    );
    if args.is_lambda() {
        registry
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .without_time()
                    .with_target(false),
            )
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}
