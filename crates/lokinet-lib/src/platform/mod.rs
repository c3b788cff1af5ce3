// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

//! The Uniffi generated bindings for the Lokinet glue library, used by the mobile frontends.
//!
//! Usage:
//!
//! 1. Initialise the library: `configureLib(..)`.
//!
//!     This sets up the logger and reads (or creates) the glue config file.
//!
//! 2. Register the VPN profile: `enableTunnelProfile(..)`.
//!
//!     Finds the profile of our network extension in the OS preferences, creating it if needed,
//!     enables it and saves it back.
//!
//! 3. Start the engine: `bootstrapEngine(..)`.
//!
//!     Writes the bundled engine config and hands control to liblokinet. Failures are returned to
//!     the caller. `stopEngine()` terminates it again.
//!
//! 4. Inside the packet tunnel: `openTcpTunnel(..)` and `closeTcpTunnel()`.
//!
//! Host callbacks are invoked on threads owned by this library, never on the runtime, so they are
//! free to call these functions again.

pub(crate) mod error;
mod host_thread;
pub mod logging;
mod profile_store;
mod status_listener;

use std::{path::PathBuf, sync::Arc};

use lazy_static::lazy_static;
use lokinet_engine::{ContextSignaller, LibLokinet};
use tokio::{runtime::Runtime, sync::Mutex, task::JoinHandle};

pub use self::{
    profile_store::{ForeignProfileStore, OSTunnelProfileStore},
    status_listener::{TunnelOpenCompletion, TunnelStatusListener},
};
use self::{error::VpnError, host_thread::HostDispatcher};
use crate::{
    bootstrap::{BootstrapOptions, EngineBootstrapper, RunningEngine},
    config::LokinetConfig,
    profile_manager::{ProfileManager, ProfileManagerConfig},
    tcp_tunnel::{TcpTunnel, TokioTransport},
    uniffi_custom_impls::{BuildInfo, ProfilePassSummary},
    version::VersionInfo,
};

lazy_static! {
    static ref RUNTIME: Runtime = Runtime::new().expect("failed to create tokio runtime");
    static ref LIB_CONFIG: Mutex<LokinetConfig> = Mutex::new(LokinetConfig::default());
    static ref ENGINE_HANDLE: Mutex<Option<RunningEngine<ContextSignaller>>> = Mutex::new(None);
    static ref TUNNEL_HANDLE: Mutex<Option<TunnelHandle>> = Mutex::new(None);
}

struct TunnelHandle {
    tunnel: TcpTunnel<TokioTransport>,
    _event_broadcaster: JoinHandle<()>,
}

/// Setup the library: start logging and load the glue config from `config_path`, writing the
/// defaults there first if the file does not exist.
#[allow(non_snake_case)]
#[uniffi::export]
pub fn configureLib(config_path: PathBuf) -> Result<(), VpnError> {
    RUNTIME.block_on(configure_lib(config_path))
}

async fn configure_lib(config_path: PathBuf) -> Result<(), VpnError> {
    init_logger();
    let config = LokinetConfig::read_or_create(&config_path)?;
    tracing::info!("Using config: {}", config);
    *LIB_CONFIG.lock().await = config;
    Ok(())
}

fn init_logger() {
    logging::init_logger("");
}

/// Additional extra function for when only want to set the logger without initializing the
/// library. Thus it's only needed when `configureLib` is not used.
#[allow(non_snake_case)]
#[uniffi::export]
pub fn initLogger() {
    init_logger();
}

/// Find, enable and save the tunnel profile of the Lokinet network extension.
#[allow(non_snake_case)]
#[uniffi::export]
pub fn enableTunnelProfile(
    store: Arc<dyn OSTunnelProfileStore>,
) -> Result<ProfilePassSummary, VpnError> {
    RUNTIME.block_on(enable_tunnel_profile(store))
}

async fn enable_tunnel_profile(
    store: Arc<dyn OSTunnelProfileStore>,
) -> Result<ProfilePassSummary, VpnError> {
    let config = ProfileManagerConfig::from(LIB_CONFIG.lock().await.profile.clone());
    let mut manager = ProfileManager::new(ForeignProfileStore::new(store), config);
    let pass = manager.enable().await?;
    Ok(pass.into())
}

/// Start the engine from the config file shipped in `bundle_path`. The engine library is loaded
/// from `library_path`, the configured path, or the platform search path, in that order.
#[allow(non_snake_case)]
#[uniffi::export]
pub fn bootstrapEngine(bundle_path: PathBuf, library_path: Option<PathBuf>) -> Result<(), VpnError> {
    RUNTIME.block_on(bootstrap_engine(bundle_path, library_path))
}

async fn bootstrap_engine(
    bundle_path: PathBuf,
    library_path: Option<PathBuf>,
) -> Result<(), VpnError> {
    let mut guard = ENGINE_HANDLE.lock().await;
    if guard.as_ref().is_some_and(|engine| !engine.is_finished()) {
        return Err(VpnError::InvalidStateError {
            details: "Engine is already running.".to_owned(),
        });
    }

    let settings = LIB_CONFIG.lock().await.engine.clone();
    let library = match library_path.or(settings.library_path.clone()) {
        Some(path) => LibLokinet::open(path)?,
        None => LibLokinet::open_default()?,
    };

    let bootstrapper = EngineBootstrapper::new(
        library,
        bundle_path.join(&settings.bundled_config_file),
        BootstrapOptions::from(&settings),
    );
    let context = bootstrapper.bootstrap()?;
    *guard = Some(RunningEngine::start(context)?);
    Ok(())
}

/// Stop the engine started by `bootstrapEngine` and wait for it to exit.
#[allow(non_snake_case)]
#[uniffi::export]
pub fn stopEngine() -> Result<(), VpnError> {
    RUNTIME.block_on(stop_engine())
}

async fn stop_engine() -> Result<(), VpnError> {
    let mut guard = ENGINE_HANDLE.lock().await;

    match guard.take() {
        Some(engine) => Ok(engine.stop().await?),
        None => Err(VpnError::InvalidStateError {
            details: "Engine is not running.".to_owned(),
        }),
    }
}

/// Connect to the configured tunnel endpoint. `completion` is called once with the outcome,
/// `listener` receives every state change and the data read afterwards.
#[allow(non_snake_case)]
#[uniffi::export]
pub fn openTcpTunnel(
    completion: Arc<dyn TunnelOpenCompletion>,
    listener: Option<Arc<dyn TunnelStatusListener>>,
) -> Result<(), VpnError> {
    RUNTIME.block_on(open_tcp_tunnel(completion, listener))
}

async fn open_tcp_tunnel(
    completion: Arc<dyn TunnelOpenCompletion>,
    listener: Option<Arc<dyn TunnelStatusListener>>,
) -> Result<(), VpnError> {
    let mut guard = TUNNEL_HANDLE.lock().await;
    if guard.as_ref().is_some_and(|handle| handle.tunnel.is_open()) {
        return Err(VpnError::InvalidStateError {
            details: "Tunnel is already open.".to_owned(),
        });
    }

    let config = LIB_CONFIG.lock().await.tunnel.clone();
    let dispatcher = HostDispatcher::spawn("lokinet-tunnel-callbacks")?;
    let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = TunnelHandle {
        tunnel: TcpTunnel::new(TokioTransport, config, event_tx),
        _event_broadcaster: status_listener::spawn_event_broadcaster(
            event_rx,
            listener,
            dispatcher.clone(),
        ),
    };

    handle
        .tunnel
        .open(status_listener::into_open_completion(completion, dispatcher))?;
    *guard = Some(handle);
    Ok(())
}

/// Close the tunnel. Returns false if it was not open.
#[allow(non_snake_case)]
#[uniffi::export]
pub fn closeTcpTunnel() -> bool {
    RUNTIME.block_on(async {
        let guard = TUNNEL_HANDLE.lock().await;
        guard
            .as_ref()
            .map(|handle| handle.tunnel.close())
            .unwrap_or(false)
    })
}

#[allow(non_snake_case)]
#[uniffi::export]
pub fn getVersionInfo() -> BuildInfo {
    VersionInfo::current().into()
}
