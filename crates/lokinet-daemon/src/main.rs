// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

mod commands;
mod error;
mod shutdown_handler;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use lokinet_lib::{
    engine::LibLokinet, resolve_config_path, BootstrapOptions, EngineBootstrapper,
    RunningEngine, VersionInfo,
};

use commands::CliArgs;
use error::Result;

/// Setting this to "1" runs the engine on a single thread.
const SINGLE_THREAD_ENV: &str = "LLARP_SHADOW";

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    setup_logging(&args);
    tracing::debug!("{:?}", VersionInfo::current());

    match run(args).await {
        Ok(()) => Ok(()),
        Err(err) => match err.engine_exit_code() {
            Some(code) => {
                tracing::error!("{err}");
                std::process::exit(code);
            }
            None => Err(err).context("lokinet failed"),
        },
    }
}

pub(crate) fn setup_logging(args: &CliArgs) {
    let default_level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();

    if args.verbose {
        tracing::debug!("debug logging activated");
    }
}

fn multithreaded(single_thread_var: Option<&str>) -> bool {
    single_thread_var != Some("1")
}

async fn run(args: CliArgs) -> Result<()> {
    let resolved = resolve_config_path(args.config.as_deref())?;

    let engine = match args.library {
        Some(ref path) => LibLokinet::open(path)?,
        None => LibLokinet::open_default()?,
    };

    let options = BootstrapOptions {
        base_dir: resolved.base_dir.clone(),
        overwrite: args.force,
        as_router: args.router,
        multithreaded: multithreaded(std::env::var(SINGLE_THREAD_ENV).ok().as_deref()),
    };
    let bootstrapper = EngineBootstrapper::new(engine, resolved.path.clone(), options);

    bootstrapper.prepare(&resolved, args.generate_config)?;
    if args.generate_config {
        tracing::info!("Config file ready at {}", resolved.path.display());
        return Ok(());
    }

    if let Ok(current_dir) = std::env::current_dir() {
        tracing::info!("Running from: {}", current_dir.display());
    }
    let context = bootstrapper.main_init()?;
    let engine = RunningEngine::start(context)?;

    let mut signal_handlers = shutdown_handler::install(engine.signaller().clone());
    let result = engine.wait().await;
    signal_handlers.shutdown().await;

    tracing::info!("Exiting");
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_mode_forces_a_single_thread() {
        assert!(multithreaded(None));
        assert!(multithreaded(Some("0")));
        assert!(!multithreaded(Some("1")));
    }
}
