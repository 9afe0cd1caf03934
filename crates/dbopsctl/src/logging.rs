//! Logging for dbopsctl invocations
//!
//! Human-facing output goes to stdout; tracing goes to stderr so report
//! text stays pipeable. Filter with RUST_LOG, default `info`.

use tracing_subscriber::EnvFilter;

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
