//! Tracing subscriber setup. Logs always go to stderr so command output on
//! stdout stays machine-readable.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{CliError, CliResult};

/// Log level for a `-v` count. `None` defers to `RUST_LOG`.
#[must_use]
pub fn level_for(verbose: u8) -> Option<&'static str> {
    match verbose {
        0 => None,
        1 => Some("debug"),
        _ => Some("trace"),
    }
}

/// Install the global subscriber.
///
/// `-v` flags win over `RUST_LOG`; with neither, the level is `info`.
pub fn init(verbose: u8, json: bool) -> CliResult<()> {
    let env_filter = match level_for(verbose) {
        Some(level) => EnvFilter::try_new(level),
        None => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")),
    }
    .map_err(|e| CliError::Logging(format!("Invalid log filter: {e}")))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .json(),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact(),
            )
            .try_init()
    };
    result.map_err(|e| CliError::Logging(e.to_string()))
}
