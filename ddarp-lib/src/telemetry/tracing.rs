use tracing_subscriber::EnvFilter;

/// Initialize the fmt subscriber, honoring `RUST_LOG` and defaulting to
/// `info`. Safe to call once per process.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
