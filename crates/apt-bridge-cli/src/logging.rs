use std::path::Path;

use apt_bridge_core::{BridgeError, ErrorCode};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable holding the log filter, checked before `RUST_LOG`.
pub const LOG_ENV: &str = "APT_BRIDGE_LOG";

/// Initialize logging.
///
/// Stdout carries the event stream and stderr the error report, so nothing
/// is logged unless asked for. With `log_dir`, logs go to
/// `apt-bridge.YYYY-MM-DD.log` in that directory, rotated daily, at `debug`
/// unless `APT_BRIDGE_LOG` or `RUST_LOG` say otherwise. Without it, a filter
/// in one of those variables sends logs to stderr.
///
/// The returned [`WorkerGuard`] **must** be held until the program exits so
/// buffered records are flushed.
pub fn init(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>, BridgeError> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV).or_else(|_| EnvFilter::try_from_default_env());

    let Some(dir) = log_dir else {
        if let Ok(filter) = env_filter {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr).with_ansi(false))
                .with(filter)
                .init();
        }
        return Ok(None);
    };

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("apt-bridge")
        .filename_suffix("log")
        .build(dir)
        .map_err(|e| {
            BridgeError::new(
                ErrorCode::ConfigError,
                format!("Cannot open log directory '{}'", dir.display()),
            )
            .with_details(e.to_string())
        })?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true),
        )
        .with(env_filter.unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    Ok(Some(guard))
}
