//! Logging bootstrap. The engine only emits `tracing` events; collection and
//! shipping belong to the embedding application.

use tracing_subscriber::EnvFilter;

/// Install a formatted `tracing` subscriber honoring `RUST_LOG`, defaulting
/// to `info`.
///
/// Convenience for embedding applications; calling it twice is harmless (the
/// second install attempt is ignored).
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
