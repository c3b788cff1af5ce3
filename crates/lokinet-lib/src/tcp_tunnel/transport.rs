// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

use std::{fmt, sync::Arc};

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;

/// The type alias for the receiving end of connection state changes.
pub type StateReceiver = UnboundedReceiver<ConnectionState>;

/// State of a byte-stream connection, driven by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// The connection has not been started or cannot be evaluated.
    Invalid,

    /// The connection is being established.
    Connecting,

    /// The connection is waiting for a usable network path.
    Waiting,

    /// The connection is established and ready for reads.
    Connected,

    /// The connection failed or was closed by the peer. The error, if any, is available from
    /// [`Connection::error`].
    Disconnected,

    /// The connection was cancelled locally.
    Cancelled,
}

impl ConnectionState {
    /// True for states the connection never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Cancelled)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "invalid"),
            Self::Connecting => write!(f, "connecting"),
            Self::Waiting => write!(f, "waiting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("TLS connections are not supported by this transport")]
    TlsUnsupported,

    #[error("connection is not established")]
    NotConnected,

    #[error("read failed: {0}")]
    Read(String),

    #[error("connection was cancelled")]
    Cancelled,
}

/// Creates byte-stream connections.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;

    /// Starts connecting to `host:port` and returns the connection handle together with the
    /// receiver of its state changes. The receiver yields the initial state first.
    fn create_connection(
        &self,
        host: &str,
        port: u16,
        enable_tls: bool,
    ) -> Result<(Arc<Self::Connection>, StateReceiver), TransportError>;
}

#[async_trait::async_trait]
pub trait Connection: Send + Sync + 'static {
    fn state(&self) -> ConnectionState;

    /// Reads at least `min` and at most `max` bytes. `Ok(None)` means the peer closed the stream.
    async fn read(&self, min: usize, max: usize) -> Result<Option<Bytes>, TransportError>;

    /// The error that moved the connection into [`ConnectionState::Disconnected`], if any.
    fn error(&self) -> Option<TransportError>;

    /// Releases the connection. Pending reads fail and the state moves to
    /// [`ConnectionState::Cancelled`] unless it already reached a terminal state.
    fn cancel(&self);
}
