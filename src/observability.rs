//! Tracing bootstrap for the daemon process.
//!
//! The parent process redirects the daemon's stdout/stderr into
//! `<dir>/daemon.log`, so this subscriber never manages file rotation
//! itself — it only configures what gets written to stdout/stderr and in
//! what shape.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

const DEFAULT_FILTER: &str = "moat_daemon=info";

/// Initialize the global tracing subscriber for the daemon process.
///
/// Respects `RUST_LOG` (falling back to [`DEFAULT_FILTER`]) and switches to
/// JSON output when `MOAT_LOG_FORMAT=json`.
pub fn init_daemon_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json = std::env::var("MOAT_LOG_FORMAT").is_ok_and(|value| value == "json");

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Initialize a minimal stderr-only subscriber for the CLI front-end
/// (`moat-daemon` invoked without `_daemon`, e.g. a future `status`/`stop`
/// subcommand). Kept deliberately quieter than [`init_daemon_logging`].
pub fn init_cli_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("moat_daemon=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}
