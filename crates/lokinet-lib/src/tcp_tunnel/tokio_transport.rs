// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;

use bytes::Bytes;
use tokio::{
    io::AsyncReadExt,
    net::TcpStream,
    sync::mpsc::{self, UnboundedSender},
};
use tokio_util::sync::CancellationToken;

use super::transport::{Connection, ConnectionState, StateReceiver, Transport, TransportError};

/// Plain TCP transport on top of tokio. Connections are established on the current runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioTransport;

impl Transport for TokioTransport {
    type Connection = TokioConnection;

    fn create_connection(
        &self,
        host: &str,
        port: u16,
        enable_tls: bool,
    ) -> Result<(Arc<TokioConnection>, StateReceiver), TransportError> {
        if enable_tls {
            return Err(TransportError::TlsUnsupported);
        }

        let address = format!("{host}:{port}");
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|err| TransportError::Connect {
                address: address.clone(),
                reason: err.to_string(),
            })?;

        let (state_tx, state_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(TokioConnection {
            address,
            stream: tokio::sync::Mutex::new(None),
            status: parking_lot::Mutex::new(Status {
                state: ConnectionState::Invalid,
                error: None,
            }),
            state_tx,
            cancel_token: CancellationToken::new(),
        });
        connection.set_state(ConnectionState::Connecting, None);

        runtime.spawn(connect(connection.clone(), host.to_owned(), port));
        Ok((connection, state_rx))
    }
}

struct Status {
    state: ConnectionState,
    error: Option<TransportError>,
}

pub struct TokioConnection {
    address: String,
    stream: tokio::sync::Mutex<Option<TcpStream>>,
    status: parking_lot::Mutex<Status>,
    state_tx: UnboundedSender<ConnectionState>,
    cancel_token: CancellationToken,
}

impl TokioConnection {
    pub fn address(&self) -> &str {
        &self.address
    }

    // Terminal states are final, repeated states are not published.
    fn set_state(&self, state: ConnectionState, error: Option<TransportError>) -> bool {
        let mut status = self.status.lock();
        if status.state.is_terminal() || status.state == state {
            return false;
        }
        status.state = state;
        if error.is_some() {
            status.error = error;
        }
        // Sent under the lock so observers see the states in order.
        if self.state_tx.send(state).is_err() {
            tracing::trace!("No observer for state change of {}", self.address);
        }
        true
    }
}

async fn connect(connection: Arc<TokioConnection>, host: String, port: u16) {
    let result = tokio::select! {
        _ = connection.cancel_token.cancelled() => return,
        result = TcpStream::connect((host.as_str(), port)) => result,
    };

    match result {
        Ok(stream) => {
            let mut guard = connection.stream.lock().await;
            if connection.cancel_token.is_cancelled() {
                return;
            }
            *guard = Some(stream);
            drop(guard);
            tracing::debug!("Connected to {}", connection.address);
            connection.set_state(ConnectionState::Connected, None);
        }
        Err(err) => {
            tracing::debug!("Failed to connect to {}: {}", connection.address, err);
            let error = TransportError::Connect {
                address: connection.address.clone(),
                reason: err.to_string(),
            };
            connection.set_state(ConnectionState::Disconnected, Some(error));
        }
    }
}

#[async_trait::async_trait]
impl Connection for TokioConnection {
    fn state(&self) -> ConnectionState {
        self.status.lock().state
    }

    async fn read(&self, min: usize, max: usize) -> Result<Option<Bytes>, TransportError> {
        if self.cancel_token.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(TransportError::NotConnected)?;

        let max = max.max(1);
        let min = min.min(max);
        let mut buf = vec![0u8; max];
        let mut filled = 0;

        loop {
            let read = tokio::select! {
                _ = self.cancel_token.cancelled() => return Err(TransportError::Cancelled),
                read = stream.read(&mut buf[filled..]) => read,
            };

            match read {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => break,
                Ok(n) => {
                    filled += n;
                    if filled >= min {
                        break;
                    }
                }
                Err(err) => {
                    let error = TransportError::Read(err.to_string());
                    guard.take();
                    self.set_state(ConnectionState::Disconnected, Some(error.clone()));
                    return Err(error);
                }
            }
        }

        buf.truncate(filled);
        Ok(Some(Bytes::from(buf)))
    }

    fn error(&self) -> Option<TransportError> {
        self.status.lock().error.clone()
    }

    fn cancel(&self) {
        self.cancel_token.cancel();
        if let Ok(mut stream) = self.stream.try_lock() {
            stream.take();
        }
        self.set_state(ConnectionState::Cancelled, None);
    }
}

impl Drop for TokioConnection {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
