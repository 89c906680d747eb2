//! Tracing subscriber setup
//!
//! Filter priority: `QUILL_LOG`, then `RUST_LOG`, then the `--log-level`
//! flag. Output goes to stderr so reports on stdout stay machine-readable.

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// # Arguments
/// * `level` - default directive when no environment filter is set
/// * `json` - emit one JSON object per event instead of text
pub(crate) fn init(level: &str, json: bool) {
    let filter = build_filter(level);
    let layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    // A second init (tests) is not an error worth surfacing.
    let _ = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.compact())
            .try_init()
    };
}

fn build_filter(level: &str) -> EnvFilter {
    for var in ["QUILL_LOG", "RUST_LOG"] {
        if let Ok(directives) = std::env::var(var) {
            if let Ok(filter) = EnvFilter::try_new(&directives) {
                return filter;
            }
        }
    }
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
}
