// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

use lokinet_lib::BootstrapError;

#[derive(thiserror::Error, Debug)]
pub(crate) enum Error {
    #[error(transparent)]
    Engine(#[from] lokinet_lib::engine::Error),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}

impl Error {
    /// Exit code of the engine, when it stopped with one.
    pub(crate) fn engine_exit_code(&self) -> Option<i32> {
        match self {
            Self::Bootstrap(err) => err.engine_exit_code(),
            Self::Engine(_) => None,
        }
    }
}

// Result type based on our error type
pub(crate) type Result<T> = std::result::Result<T, Error>;
