// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

use std::io;

use lokinet_lib::engine::{EngineSignaller, Signal};
use tokio::task::JoinSet;

/// Forwards process signals to the engine until the returned set is shut down.
pub fn install<S: EngineSignaller>(signaller: S) -> JoinSet<()> {
    let mut join_set = JoinSet::new();

    let ctrlc_signaller = signaller.clone();
    join_set.spawn(async move {
        if let Err(e) = forward_ctrlc(ctrlc_signaller).await {
            tracing::error!("Failed to set the ctrl-c handler: {}", e);
        }
    });

    #[cfg(unix)]
    join_set.spawn(async move {
        if let Err(e) = forward_termination_signals(signaller).await {
            tracing::error!("Failed to set the termination handler: {}", e);
        }
    });

    join_set
}

async fn forward_ctrlc<S: EngineSignaller>(signaller: S) -> io::Result<()> {
    loop {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl-C signal.");
        signaller.signal(Signal::Interrupt);
    }
}

#[cfg(unix)]
async fn forward_termination_signals<S: EngineSignaller>(signaller: S) -> io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            Some(()) = sigterm.recv() => {
                tracing::info!("Received SIGTERM signal.");
                signaller.signal(Signal::Terminate);
            },
            Some(()) = sighup.recv() => {
                tracing::info!("Received SIGHUP signal.");
                signaller.signal(Signal::Hangup);
            },
            else => break,
        }
    }

    Ok(())
}
