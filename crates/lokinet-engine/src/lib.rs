// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

//! Interface to the Lokinet network engine.
//!
//! The engine itself (onion routing, DHT, packet transport) is a native library. This crate only
//! exposes its lifecycle entry points behind the [`Engine`] and [`EngineContext`] traits and turns
//! their C return values into errors the host can react to.

mod liblokinet;
mod sys;

use std::{
    fmt,
    path::{Path, PathBuf},
};

pub use liblokinet::{ContextSignaller, LibLokinet, LibLokinetContext};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load engine library {path}")]
    LoadLibrary {
        path: PathBuf,
        source: libloading::Error,
    },

    #[error("engine library is missing symbol {symbol}")]
    MissingSymbol {
        symbol: &'static str,
        source: libloading::Error,
    },

    #[error("path is not valid UTF-8: {0}")]
    InvalidPath(PathBuf),

    #[error("path contains nul byte: {0}")]
    PathContainsNulByte(PathBuf),

    #[error("engine failed to ensure config at {0}")]
    EnsureConfig(PathBuf),

    #[error("engine failed to initialize from {0}")]
    MainInit(PathBuf),

    #[error("engine setup failed (code: {0})")]
    Setup(i32),

    #[error("engine exited with failure (code: {0})")]
    Run(i32),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Signals understood by a running engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// Graceful shutdown request from the terminal.
    Interrupt,
    /// Graceful shutdown request from the system.
    Terminate,
    /// Reload configuration.
    Hangup,
}

impl Signal {
    /// POSIX signal number handed to the engine.
    pub fn as_raw(&self) -> i32 {
        match self {
            Signal::Hangup => 1,
            Signal::Interrupt => 2,
            Signal::Terminate => 15,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => write!(f, "SIGINT"),
            Signal::Terminate => write!(f, "SIGTERM"),
            Signal::Hangup => write!(f, "SIGHUP"),
        }
    }
}

/// Entry points used to hand control to the engine.
pub trait Engine: Send + Sync {
    type Context: EngineContext;

    /// Make sure a config file exists at `config_path`, creating a default one when absent or when
    /// `overwrite` is set.
    fn ensure_config(
        &self,
        config_path: &Path,
        base_dir: Option<&Path>,
        overwrite: bool,
        as_router: bool,
    ) -> Result<()>;

    /// Initialize an engine context from the config file.
    fn main_init(&self, config_path: &Path, multithreaded: bool) -> Result<Self::Context>;
}

/// An initialized engine. Dropping the context frees it.
pub trait EngineContext: Send {
    type Signaller: EngineSignaller;

    fn setup(&mut self) -> Result<()>;

    /// Runs the engine main loop. Blocks until the engine stops.
    fn run(&mut self) -> Result<()>;

    /// Handle that can deliver signals while [`EngineContext::run`] blocks.
    fn signaller(&self) -> Self::Signaller;
}

pub trait EngineSignaller: Clone + Send + Sync + 'static {
    /// Delivers the signal. Does nothing once the context has been freed.
    fn signal(&self, signal: Signal);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_map_to_posix_numbers() {
        assert_eq!(Signal::Hangup.as_raw(), 1);
        assert_eq!(Signal::Interrupt.as_raw(), 2);
        assert_eq!(Signal::Terminate.as_raw(), 15);
        assert_eq!(Signal::Terminate.to_string(), "SIGTERM");
    }
}
