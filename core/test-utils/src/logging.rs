use tracing_subscriber::EnvFilter;

/// Install a test friendly subscriber. Safe to call from every test, only the first
/// call wins.
pub fn try_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
