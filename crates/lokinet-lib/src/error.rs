// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

use crate::{bootstrap::BootstrapError, config::ConfigSetupError, tcp_tunnel::TunnelError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("found {count} tunnel profiles for {identifier}, refusing to pick one")]
    DuplicateProfiles { identifier: String, count: usize },

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Config(#[from] ConfigSetupError),
}

// Result type based on our error type
pub type Result<T> = std::result::Result<T, Error>;
