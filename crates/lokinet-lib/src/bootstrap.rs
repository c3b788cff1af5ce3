// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

//! Hands control to the network engine: find the config file, make sure it exists, and
//! initialize an engine context from it. Unlike the bare C entry points, every step reports
//! failure back to the caller.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use lokinet_engine::{Engine, EngineContext, EngineSignaller, Signal};
use tokio::task::JoinHandle;

use crate::config::EngineSettings;

/// Engine config file shipped inside the app bundle.
pub const BUNDLED_CONFIG_FILE: &str = "liblokinet-configuration.ini";

const DEFAULT_CONFIG_DIR: &str = ".lokinet";
const DEFAULT_CONFIG_FILE: &str = "lokinet.ini";

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("failed to ensure engine config at {path}")]
    EnsureConfig {
        path: PathBuf,
        source: lokinet_engine::Error,
    },

    #[error("failed to initialize engine from {path}")]
    MainInit {
        path: PathBuf,
        source: lokinet_engine::Error,
    },

    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("failed to create '{dir}': {error}")]
    CreateDirectory { dir: PathBuf, error: io::Error },

    #[error("failed to determine the home directory")]
    NoHomeDirectory,

    #[error("failed to determine the current directory: {0}")]
    CurrentDirectory(#[source] io::Error),

    #[error("engine setup failed")]
    Setup(#[source] lokinet_engine::Error),

    #[error("engine stopped with an error")]
    Run(#[source] lokinet_engine::Error),

    #[error("engine thread failed: {0}")]
    EngineThread(String),
}

impl BootstrapError {
    /// Exit code reported by the engine main loop, if it failed with one.
    pub fn engine_exit_code(&self) -> Option<i32> {
        match self {
            Self::Setup(lokinet_engine::Error::Setup(code))
            | Self::Run(lokinet_engine::Error::Run(code)) => Some(*code),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootstrapOptions {
    pub base_dir: Option<PathBuf>,
    pub overwrite: bool,
    pub as_router: bool,
    pub multithreaded: bool,
}

impl BootstrapOptions {
    /// Options used when starting the engine from a mobile app bundle: the bundled config is
    /// always rewritten and the engine runs single-threaded as a client.
    pub fn bundled() -> Self {
        Self {
            base_dir: None,
            overwrite: true,
            as_router: false,
            multithreaded: false,
        }
    }
}

impl From<&EngineSettings> for BootstrapOptions {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            base_dir: None,
            overwrite: settings.overwrite_config,
            as_router: settings.as_router,
            multithreaded: settings.multithreaded,
        }
    }
}

pub struct EngineBootstrapper<E> {
    engine: E,
    config_path: PathBuf,
    options: BootstrapOptions,
}

impl<E: Engine> EngineBootstrapper<E> {
    pub fn new(engine: E, config_path: PathBuf, options: BootstrapOptions) -> Self {
        Self {
            engine,
            config_path,
            options,
        }
    }

    /// Bootstrapper for the config file shipped in `bundle_dir`.
    pub fn for_bundle(engine: E, bundle_dir: impl AsRef<Path>) -> Self {
        Self::new(
            engine,
            bundled_config_path(bundle_dir),
            BootstrapOptions::bundled(),
        )
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn options(&self) -> &BootstrapOptions {
        &self.options
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn ensure_config(&self) -> Result<(), BootstrapError> {
        tracing::debug!("Ensuring engine config at {}", self.config_path.display());
        self.engine
            .ensure_config(
                &self.config_path,
                self.options.base_dir.as_deref(),
                self.options.overwrite,
                self.options.as_router,
            )
            .map_err(|source| BootstrapError::EnsureConfig {
                path: self.config_path.clone(),
                source,
            })
    }

    pub fn main_init(&self) -> Result<E::Context, BootstrapError> {
        tracing::info!("Using config file: {}", self.config_path.display());
        self.engine
            .main_init(&self.config_path, self.options.multithreaded)
            .map_err(|source| BootstrapError::MainInit {
                path: self.config_path.clone(),
                source,
            })
    }

    /// Ensures the config exists and initializes an engine context from it.
    pub fn bootstrap(&self) -> Result<E::Context, BootstrapError> {
        self.ensure_config()?;
        self.main_init()
    }

    /// Gets the config file at `resolved` ready for [`EngineBootstrapper::main_init`].
    ///
    /// The file is (re)generated when `generate_only` is set or when the default location is in
    /// use. Otherwise an explicitly given file has to exist already.
    pub fn prepare(&self, resolved: &ResolvedConfig, generate_only: bool) -> Result<(), BootstrapError> {
        if generate_only || resolved.is_default {
            self.ensure_config()
        } else if resolved.path.exists() {
            Ok(())
        } else {
            tracing::error!("Config file not found {}", resolved.path.display());
            Err(BootstrapError::ConfigNotFound(resolved.path.clone()))
        }
    }
}

/// An engine main loop running on the blocking thread pool.
pub struct RunningEngine<S> {
    signaller: S,
    task: JoinHandle<lokinet_engine::Result<()>>,
}

impl<S: EngineSignaller> RunningEngine<S> {
    /// Sets the context up and runs its main loop on a blocking thread. The context is freed
    /// once the main loop returns. Must be called within a tokio runtime.
    pub fn start<C>(mut context: C) -> Result<Self, BootstrapError>
    where
        C: EngineContext<Signaller = S> + 'static,
    {
        context.setup().map_err(BootstrapError::Setup)?;
        let signaller = context.signaller();

        let task = tokio::task::spawn_blocking(move || {
            tracing::info!("Engine main loop started");
            let result = context.run();
            drop(context);
            tracing::info!("Engine main loop exited");
            result
        });

        Ok(Self { signaller, task })
    }

    pub fn signaller(&self) -> &S {
        &self.signaller
    }

    pub fn signal(&self, signal: Signal) {
        self.signaller.signal(signal);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the main loop to return on its own.
    pub async fn wait(self) -> Result<(), BootstrapError> {
        self.task
            .await
            .map_err(|err| BootstrapError::EngineThread(err.to_string()))?
            .map_err(BootstrapError::Run)
    }

    /// Asks the engine to terminate and waits for the main loop to return.
    pub async fn stop(self) -> Result<(), BootstrapError> {
        self.signal(Signal::Terminate);
        self.wait().await
    }
}

pub fn bundled_config_path(bundle_dir: impl AsRef<Path>) -> PathBuf {
    bundle_dir.as_ref().join(BUNDLED_CONFIG_FILE)
}

/// Location of the engine config file on a desktop system.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub path: PathBuf,
    /// Directory handed to the engine for the files it generates next to the config.
    pub base_dir: Option<PathBuf>,
    /// True when no path was given and the per-user default is used.
    pub is_default: bool,
}

/// Resolves the config file location, creating its directory.
///
/// An explicit path has `~` expanded and is made absolute. Without one, `~/.lokinet/lokinet.ini`
/// (`%APPDATA%\.lokinet\lokinet.ini` on Windows) is used.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<ResolvedConfig, BootstrapError> {
    match explicit {
        Some(path) => resolve_explicit(path),
        None => {
            let base_dir = default_home_dir()
                .ok_or(BootstrapError::NoHomeDirectory)?
                .join(DEFAULT_CONFIG_DIR);
            tracing::debug!("Find or create {}", base_dir.display());
            create_dir(&base_dir)?;
            Ok(ResolvedConfig {
                path: base_dir.join(DEFAULT_CONFIG_FILE),
                base_dir: Some(base_dir),
                is_default: true,
            })
        }
    }
}

fn resolve_explicit(path: &Path) -> Result<ResolvedConfig, BootstrapError> {
    let has_dir = path
        .parent()
        .is_some_and(|parent| !parent.as_os_str().is_empty());

    let expanded = expand_home(path)?;
    let absolute = match expanded.canonicalize() {
        Ok(canonical) => canonical,
        Err(_) if expanded.is_absolute() => expanded,
        Err(_) => std::env::current_dir()
            .map_err(BootstrapError::CurrentDirectory)?
            .join(expanded),
    };

    let base_dir = if has_dir {
        let parent = absolute.parent().map(Path::to_path_buf);
        if let Some(ref parent) = parent {
            create_dir(parent)?;
        }
        parent
    } else {
        None
    };

    Ok(ResolvedConfig {
        path: absolute,
        base_dir,
        is_default: false,
    })
}

fn expand_home(path: &Path) -> Result<PathBuf, BootstrapError> {
    match path.strip_prefix("~") {
        Ok(rest) => Ok(dirs::home_dir()
            .ok_or(BootstrapError::NoHomeDirectory)?
            .join(rest)),
        Err(_) => Ok(path.to_path_buf()),
    }
}

fn default_home_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    return dirs::config_dir();

    #[cfg(not(windows))]
    return dirs::home_dir();
}

fn create_dir(dir: &Path) -> Result<(), BootstrapError> {
    fs::create_dir_all(dir).map_err(|error| BootstrapError::CreateDirectory {
        dir: dir.to_path_buf(),
        error,
    })
}
