//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `PIPESH_LOG` environment variable (e.g. "info", "debug")
//! 3. default to `warn`
//!
//! Logs go to stderr so they never mix with a pipeline's standard output.

use anyhow::{Result, anyhow};
use tracing_subscriber::fmt;

pub const LOG_ENV: &str = "PIPESH_LOG";

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<&str>) -> Result<()> {
    let level = match cli_level {
        Some(raw) => {
            parse_level_str(raw).ok_or_else(|| anyhow!("unknown log level '{raw}'"))?
        }
        None => std::env::var(LOG_ENV)
            .ok()
            .and_then(|s| parse_level_str(&s))
            .unwrap_or(tracing::Level::WARN),
    };

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!(e))
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}
