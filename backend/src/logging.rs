use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber. Log levels come from `RUST_LOG`,
/// defaulting to `info`.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
