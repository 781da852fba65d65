//! Diagnostics for the engine via `tracing`.
//!
//! Tracing is for developers: filtered by `RUST_LOG`, written to stderr and
//! never persisted. The per-attempt product record lives in the session log
//! (`io/session_log`, `.cortex/sessions/`) and is written regardless of the
//! filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset or blank.
pub const DEFAULT_DIRECTIVE: &str = "warn";

/// Pick the filter directive from the raw `RUST_LOG` value.
fn directive(raw: Option<String>) -> String {
    raw.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string())
}

/// Install the stderr subscriber (compact format).
///
/// Stage starts and finishes log at `info`, failures and sink problems at
/// `warn`, parse traces at `debug`:
///
/// ```bash
/// RUST_LOG=cortex=debug cortex run "pick a venue"
/// ```
pub fn init() {
    let filter = EnvFilter::try_new(directive(std::env::var("RUST_LOG").ok()))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    // Keeps the first subscriber if one is already installed.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
