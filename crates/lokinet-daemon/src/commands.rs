// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

use std::{path::PathBuf, sync::OnceLock};

use clap::Parser;
use lokinet_lib::VersionInfo;

// Helper for passing LONG_VERSION to clap
fn pretty_build_info_static() -> &'static str {
    static PRETTY_BUILD_INFORMATION: OnceLock<String> = OnceLock::new();
    PRETTY_BUILD_INFORMATION.get_or_init(|| VersionInfo::current().to_string())
}

#[derive(Parser, Debug)]
#[clap(name = "lokinet", version, about, long_version = pretty_build_info_static())]
pub(crate) struct CliArgs {
    /// Enable debug logging.
    #[arg(short, long)]
    pub(crate) verbose: bool,

    /// Generate the config file and exit.
    #[arg(short = 'g', short_alias = 'c', long)]
    pub(crate) generate_config: bool,

    /// Overwrite an existing config file when generating.
    #[arg(short = 'f', long)]
    pub(crate) force: bool,

    /// Generate a relay (router) config instead of a client config.
    #[arg(short, long)]
    pub(crate) router: bool,

    /// Path to the engine library. Searched on the platform library path when not set.
    #[arg(long, env = "LOKINET_LIBRARY")]
    pub(crate) library: Option<PathBuf>,

    /// Engine config file. Defaults to ~/.lokinet/lokinet.ini.
    pub(crate) config: Option<PathBuf>,
}
