//! Tracing subscriber setup.
//!
//! Logs go to stderr so `index --dry-run` can stream JSON on stdout.
//! Verbosity follows `RUST_LOG`; without it the crate and HTTP layer log
//! at `info`.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "chat_rag=info,tower_http=info";

/// Installs the global subscriber. Calling it twice is harmless.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
