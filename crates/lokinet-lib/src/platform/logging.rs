// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use tracing_subscriber::{filter::LevelFilter, EnvFilter};

pub(crate) const DEFAULT_LOG_FILE: &str = "lokinet-lib.log";

const NOISY_TARGETS: &[&str] = &["mio", "tokio_reactor", "want", "uniffi"];

/// Enables logging with `tracing-subscriber`. When `path_str` names an existing file or directory
/// logs are written there through `tracing-appender`, otherwise to the console. A directory gets
/// "{dir}/lokinet-lib.log".
///
/// The filter is read from `RUST_LOG` and defaults to `INFO`. On iOS logs go to the unified
/// logging system instead.
///
/// Calling this more than once keeps the first logger.
pub fn init_logger(path_str: &str) {
    #[cfg(target_os = "ios")]
    {
        let _ = path_str;
        let level = std::env::var("RUST_LOG").unwrap_or("info".to_string());
        init_oslog(&level);
    }

    #[cfg(not(target_os = "ios"))]
    init_subscriber(path_str);
}

#[cfg(not(target_os = "ios"))]
fn init_subscriber(path_str: &str) {
    let filter = NOISY_TARGETS.iter().fold(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
        |filter, target| match format!("{target}=warn").parse() {
            Ok(directive) => filter.add_directive(directive),
            Err(_) => filter,
        },
    );

    let log_builder = tracing_subscriber::fmt().with_env_filter(filter).compact();

    let result = if let Some(appender) = try_make_writer(path_str) {
        std::panic::set_hook(Box::new(|panic| {
            tracing::error!(message = %panic);
        }));

        log_builder.with_writer(appender).try_init()
    } else {
        log_builder.try_init()
    };

    match result {
        Ok(()) => tracing::debug!("Logger initialized"),
        Err(err) => tracing::debug!("Logger already initialized: {}", err),
    }
}

fn try_make_writer(path_str: &str) -> Option<tracing_appender::rolling::RollingFileAppender> {
    if path_str.is_empty() {
        return None;
    }

    let path = Path::new(path_str).canonicalize().ok()?;
    let (log_dir, filename) = log_location(&path)?;

    // make sure the directory exists and we have permission to access it
    if !log_dir.try_exists().is_ok_and(|exists| exists) {
        return None;
    }

    Some(tracing_appender::rolling::never(log_dir, filename))
}

fn log_location(path: &Path) -> Option<(&Path, &Path)> {
    if path.is_dir() {
        Some((path, Path::new(DEFAULT_LOG_FILE)))
    } else if path.is_file() {
        Some((path.parent()?, Path::new(path.file_name()?)))
    } else {
        None
    }
}

#[cfg(target_os = "ios")]
fn init_oslog(level: &str) {
    use std::str::FromStr;

    use log::LevelFilter;
    use oslog::OsLogger;

    let level = LevelFilter::from_str(level).unwrap_or(LevelFilter::Info);
    let logger = NOISY_TARGETS
        .iter()
        .fold(OsLogger::new("org.lokinet").level_filter(level), |logger, target| {
            logger.category_level_filter(target, LevelFilter::Warn)
        });

    match logger.init() {
        Ok(_) => tracing::debug!("Logger initialized"),
        Err(e) => tracing::error!("Failed to initialize os logger: {}", e),
    }
}
