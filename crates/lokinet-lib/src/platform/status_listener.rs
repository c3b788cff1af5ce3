// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;

use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};

use super::host_thread::HostDispatcher;
use crate::{
    tcp_tunnel::{OpenCompletion, TunnelEvent},
    uniffi_custom_impls::TunnelStatusEvent,
};

/// Receives the outcome of `openTcpTunnel`. Called at most once per open.
#[uniffi::export(with_foreign)]
pub trait TunnelOpenCompletion: Send + Sync + std::fmt::Debug {
    /// `error` is `None` when the connection was established.
    fn on_complete(&self, error: Option<String>);
}

#[uniffi::export(with_foreign)]
pub trait TunnelStatusListener: Send + Sync + std::fmt::Debug {
    fn on_event(&self, event: TunnelStatusEvent);
}

pub(super) fn into_open_completion(
    completion: Arc<dyn TunnelOpenCompletion>,
    dispatcher: HostDispatcher,
) -> OpenCompletion {
    Box::new(move |result| {
        if let Err(ref err) = result {
            tracing::warn!("Tunnel open failed: {}", err);
        }
        let error = result.err().map(|err| err.to_string());
        dispatcher.dispatch(move || completion.on_complete(error));
    })
}

/// Forwards tunnel events to the listener until the tunnel is dropped.
pub(super) fn spawn_event_broadcaster(
    mut event_rx: UnboundedReceiver<TunnelEvent>,
    listener: Option<Arc<dyn TunnelStatusListener>>,
    dispatcher: HostDispatcher,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if let Some(ref listener) = listener {
                let listener = listener.clone();
                let event = TunnelStatusEvent::from(event);
                dispatcher.dispatch(move || listener.on_event(event));
            }
        }
    })
}
