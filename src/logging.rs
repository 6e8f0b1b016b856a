use std::env;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("True") | Ok("TRUE")
    )
}

/// Sets up stdout logging plus a daily rolling log file.
///
/// `LOG_LEVEL` (default `info`) is an `EnvFilter` directive. Files go to
/// `LOG_PATH` (default `logs`) and `LOG_DAYS` of them are kept (default 7).
/// `LOG_FILE_DISABLE` drops the file layer, `LOG_DISABLE` installs nothing.
/// Keep the returned guard alive for the life of the process.
pub fn init_logger() -> Option<WorkerGuard> {
    if env_flag("LOG_DISABLE") {
        return None;
    }

    let filter = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter_layer = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_ansi(true);

    if env_flag("LOG_FILE_DISABLE") {
        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(filter_layer)
            .init();
        return None;
    }

    let log_path = env::var("LOG_PATH").unwrap_or_else(|_| "logs".to_string());
    let log_days: usize = env::var("LOG_DAYS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(7);

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("chunk-courier")
        .filename_suffix("log")
        .max_log_files(log_days.max(1))
        .build(&log_path);

    match appender {
        Ok(file_appender) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::registry()
                .with(stdout_layer)
                .with(
                    fmt::layer()
                        .with_writer(non_blocking) // Log to file
                        .with_ansi(false),
                )
                .with(filter_layer)
                .init();
            info!("Logging to stdout and {}", log_path);
            Some(guard)
        }
        Err(err) => {
            tracing_subscriber::registry()
                .with(stdout_layer)
                .with(filter_layer)
                .init();
            warn!("File logging disabled, cannot use {}: {}", log_path, err);
            None
        }
    }
}
