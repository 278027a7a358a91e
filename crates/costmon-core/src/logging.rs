//! Logging infrastructure for costmon.
//!
//! Structured logging via the `tracing` ecosystem:
//!
//! - JSON lines written to `~/.llm-cost-monitor/logs/costmon.log.<date>`
//! - Compact human-readable output on stderr
//! - `-v` raises the default level to DEBUG; `RUST_LOG` overrides both
//!
//! ## Example
//!
//! ```no_run
//! use costmon_core::logging;
//!
//! let _guard = logging::init_logging(None, false).expect("logging init");
//!
//! tracing::info!("fetch started");
//! tracing::debug!(app = "claude-code", files = 12, "scanning sources");
//! ```

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::error::Result;
use crate::paths;

/// Guard that must be held to ensure log flushing on shutdown.
///
/// Dropping it flushes pending file log entries.
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize the costmon logging system.
///
/// * `log_dir` - Optional custom log directory. Defaults to `~/.llm-cost-monitor/logs/`
/// * `verbose` - If true, sets log level to DEBUG. Otherwise uses INFO.
///
/// Returns a [`LogGuard`] that must be held for the process lifetime.
pub fn init_logging(log_dir: Option<PathBuf>, verbose: bool) -> Result<LogGuard> {
    let log_dir = match log_dir {
        Some(dir) => dir,
        None => default_log_dir()?,
    };

    paths::ensure_dir(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "costmon.log");
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "costmon={default_level},costmon_usage={default_level},costmon_config={default_level},costmon_core={default_level}"
        ))
    });

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_current_span(true)
        .with_span_list(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(verbose)
        .with_file(verbose)
        .with_line_number(verbose)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    tracing::debug!(log_dir = %log_dir.display(), verbose, "logging initialized");

    Ok(LogGuard {
        _file_guard: Some(file_guard),
    })
}

/// Initialize minimal console-only logging for testing.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Get the default log directory path.
///
/// Returns `~/.llm-cost-monitor/logs/`
pub fn default_log_dir() -> Result<PathBuf> {
    Ok(paths::default_state_dir()?.join("logs"))
}

/// Convenience macro for logging one ingested usage event.
///
/// ```ignore
/// log_usage_event!(app = "claude-code", model = "claude-sonnet-4", cost_usd = 0.003);
/// ```
#[macro_export]
macro_rules! log_usage_event {
    ($($field:tt)*) => {
        tracing::debug!(
            target: "costmon::usage",
            $($field)*,
            "usage event"
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_default_log_dir() {
        // SAFETY: serialized with every other test touching HOME
        unsafe { std::env::set_var("HOME", "/tmp/test-home") };
        let dir = default_log_dir().unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/test-home/.llm-cost-monitor/logs"));
    }

    #[test]
    fn test_init_test_logging() {
        init_test_logging();
        log_usage_event!(app = "claude-code", cost_usd = 0.5);
    }
}
