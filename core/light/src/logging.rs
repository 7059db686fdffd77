use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` directives take precedence over the level
/// picked by `verbose`.
pub fn setup(verbose: u8) -> Result<()> {
    // Build the filter from the verbosity, or environment variable
    let env_filter = EnvFilter::builder()
        .with_default_directive(
            match verbose {
                0 => LevelFilter::INFO,
                1 => LevelFilter::DEBUG,
                _2_or_more => LevelFilter::TRACE,
            }
            .into(),
        )
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_file(true))
        .with(env_filter)
        .try_init()
        .context("a global tracing subscriber is already installed")
}
