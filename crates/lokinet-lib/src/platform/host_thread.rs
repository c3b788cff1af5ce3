// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

//! Calls into the host happen on plain OS threads, never on the runtime's threads, so a host
//! callback may call back into the exported functions.

use std::thread;

use tokio::sync::{mpsc, oneshot};

use super::error::VpnError;

type Job = Box<dyn FnOnce() + Send>;

/// Runs host callbacks in submission order on a dedicated thread. The thread exits once every
/// clone of the dispatcher is dropped.
#[derive(Clone, Debug)]
pub(crate) struct HostDispatcher {
    job_tx: mpsc::UnboundedSender<Job>,
}

impl HostDispatcher {
    pub(crate) fn spawn(name: &str) -> Result<Self, VpnError> {
        let (job_tx, mut job_rx) = mpsc::unbounded_channel::<Job>();
        thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                while let Some(job) = job_rx.blocking_recv() {
                    job();
                }
                tracing::trace!("Host callback thread exiting");
            })
            .map_err(|err| VpnError::InternalError {
                details: format!("failed to start the host callback thread: {err}"),
            })?;
        Ok(Self { job_tx })
    }

    pub(crate) fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        if self.job_tx.send(Box::new(job)).is_err() {
            tracing::warn!("Host callback thread is gone, dropping callback");
        }
    }
}

/// Runs a blocking host call on its own thread and waits for the result without blocking the
/// runtime.
pub(crate) async fn call_host<T, F>(name: &str, f: F) -> Result<T, VpnError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (result_tx, result_rx) = oneshot::channel();
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            let _ = result_tx.send(f());
        })
        .map_err(|err| VpnError::InternalError {
            details: format!("failed to start the host call thread: {err}"),
        })?;

    result_rx.await.map_err(|_| VpnError::InternalError {
        details: "host call ended without a result".to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc as std_mpsc, time::Duration};

    use tokio::runtime::Handle;

    use super::*;

    #[tokio::test]
    async fn dispatched_callbacks_run_in_order_outside_the_runtime() {
        let dispatcher = HostDispatcher::spawn("test-callbacks").unwrap();
        let (seen_tx, seen_rx) = std_mpsc::channel();

        for n in 0..3 {
            let seen_tx = seen_tx.clone();
            dispatcher.dispatch(move || {
                seen_tx
                    .send((n, Handle::try_current().is_err()))
                    .unwrap();
            });
        }

        let seen: Vec<_> = (0..3)
            .map(|_| seen_rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(seen, vec![(0, true), (1, true), (2, true)]);
    }

    #[tokio::test]
    async fn host_call_returns_its_result() {
        let outside_runtime = call_host("test-call", || Handle::try_current().is_err())
            .await
            .unwrap();
        assert!(outside_runtime);
    }

    #[tokio::test]
    async fn panicking_host_call_is_an_internal_error() {
        let result = call_host("test-call", || -> u32 { panic!("host blew up") }).await;
        assert!(matches!(result, Err(VpnError::InternalError { .. })));
    }
}
