// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

uniffi::setup_scaffolding!();

pub mod bootstrap;
pub mod config;
pub mod profile_manager;
pub mod tcp_tunnel;
pub mod version;

mod error;
mod platform;
mod uniffi_custom_impls;

// Re-export the crates behind our public types
pub use lokinet_engine as engine;
pub use lokinet_profile_store as profile_store;

pub use crate::{
    bootstrap::{
        resolve_config_path, BootstrapError, BootstrapOptions, EngineBootstrapper,
        ResolvedConfig, RunningEngine,
    },
    config::LokinetConfig,
    error::{Error, Result},
    profile_manager::{DuplicateProfilePolicy, ProfileManager, ProfileManagerConfig, ProfilePass},
    tcp_tunnel::{TcpTunnel, TunnelConnectionConfig, TunnelError, TunnelEvent},
    version::{VersionInfo, VERSION},
};
