// Copyright 2024 - Loki Project
// SPDX-License-Identifier: GPL-3.0-only

//! Byte-stream tunnel to the local engine endpoint.
//!
//! [`TcpTunnel::open`] connects and watches the connection state. Once connected the open
//! completion fires and a single read loop starts; a disconnect or cancellation closes the tunnel.
//! Everything observed is published as [`TunnelEvent`]s.

mod tokio_transport;
mod transport;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc::UnboundedSender, task::JoinHandle};
use tokio_util::sync::CancellationToken;

pub use tokio_transport::{TokioConnection, TokioTransport};
pub use transport::{Connection, ConnectionState, StateReceiver, Transport, TransportError};

/// Endpoint and read sizing of the tunnel connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConnectionConfig {
    pub address: String,
    pub port: u16,
    /// Upper bound of a single read.
    pub read_buffer_size: usize,
    pub enable_tls: bool,
}

impl Default for TunnelConnectionConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_owned(),
            port: 1190,
            read_buffer_size: 4096,
            enable_tls: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TunnelError {
    #[error("tunnel is already open")]
    AlreadyOpen,

    #[error("tunnel closed before the connection was established")]
    OpenFailed { source: Option<TransportError> },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TunnelEvent {
    StateChanged(ConnectionState),
    Data(Bytes),
    /// The read loop halted, with the read error unless the peer ended the stream.
    ReadStopped(Option<TransportError>),
    Closed,
}

/// Called once per open with the outcome of the connection attempt.
pub type OpenCompletion = Box<dyn FnOnce(Result<(), TunnelError>) + Send>;

struct Session<C> {
    id: u64,
    connection: Arc<C>,
    completion: Option<OpenCompletion>,
    observer_token: CancellationToken,
    observer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

type SharedSession<C> = Arc<Mutex<Option<Session<C>>>>;

pub struct TcpTunnel<T: Transport> {
    transport: T,
    config: TunnelConnectionConfig,
    event_tx: UnboundedSender<TunnelEvent>,
    session: SharedSession<T::Connection>,
    next_id: AtomicU64,
}

impl<T: Transport> TcpTunnel<T> {
    pub fn new(
        transport: T,
        config: TunnelConnectionConfig,
        event_tx: UnboundedSender<TunnelEvent>,
    ) -> Self {
        Self {
            transport,
            config,
            event_tx,
            session: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &TunnelConnectionConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Connects to the configured endpoint. Must be called within a tokio runtime.
    ///
    /// `completion` fires at most once: with `Ok` when the connection is established, or with
    /// [`TunnelError::OpenFailed`] if the tunnel closes first. It is not called when this
    /// function returns an error.
    pub fn open(&self, completion: OpenCompletion) -> Result<(), TunnelError> {
        let mut guard = self.session.lock();
        if guard.is_some() {
            return Err(TunnelError::AlreadyOpen);
        }

        tracing::info!(
            "Opening tunnel to {}:{}",
            self.config.address,
            self.config.port
        );
        let (connection, states) = self.transport.create_connection(
            &self.config.address,
            self.config.port,
            self.config.enable_tls,
        )?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let observer_token = CancellationToken::new();
        let observer = tokio::spawn(observe(
            StateObserver {
                id,
                session: self.session.clone(),
                event_tx: self.event_tx.clone(),
                read_buffer_size: self.config.read_buffer_size,
            },
            states,
            observer_token.clone(),
        ));

        *guard = Some(Session {
            id,
            connection,
            completion: Some(completion),
            observer_token,
            observer: Some(observer),
            reader: None,
        });
        Ok(())
    }

    /// Releases the connection, fails a pending completion and detaches the state observer.
    /// Returns false when there was nothing to close.
    pub fn close(&self) -> bool {
        let session = self.session.lock().take();
        match session {
            Some(session) => {
                release(session, &self.event_tx);
                true
            }
            None => false,
        }
    }
}

impl<T: Transport> Drop for TcpTunnel<T> {
    fn drop(&mut self) {
        self.close();
    }
}

fn release<C: Connection>(mut session: Session<C>, event_tx: &UnboundedSender<TunnelEvent>) {
    tracing::info!("Closing tunnel");
    session.observer_token.cancel();
    if let Some(observer) = session.observer.take() {
        observer.abort();
    }
    if let Some(reader) = session.reader.take() {
        reader.abort();
    }
    session.connection.cancel();

    if let Some(completion) = session.completion.take() {
        completion(Err(TunnelError::OpenFailed {
            source: session.connection.error(),
        }));
    }
    send_event(event_tx, TunnelEvent::Closed);
}

fn send_event(event_tx: &UnboundedSender<TunnelEvent>, event: TunnelEvent) {
    if event_tx.send(event).is_err() {
        tracing::trace!("Tunnel event receiver dropped");
    }
}

struct StateObserver<C> {
    id: u64,
    session: SharedSession<C>,
    event_tx: UnboundedSender<TunnelEvent>,
    read_buffer_size: usize,
}

impl<C: Connection> StateObserver<C> {
    fn on_connected(&self) {
        let (completion, connection) = {
            let mut guard = self.session.lock();
            let Some(session) = guard.as_mut().filter(|session| session.id == self.id) else {
                return;
            };
            (session.completion.take(), session.connection.clone())
        };

        if let Some(completion) = completion {
            completion(Ok(()));
        }

        let mut guard = self.session.lock();
        if let Some(session) = guard.as_mut().filter(|session| session.id == self.id) {
            if session.reader.is_none() {
                session.reader = Some(tokio::spawn(read_loop(
                    connection,
                    self.read_buffer_size,
                    self.event_tx.clone(),
                )));
            }
        }
    }

    fn close(&self) {
        let session = {
            let mut guard = self.session.lock();
            if guard.as_ref().is_some_and(|session| session.id == self.id) {
                guard.take()
            } else {
                None
            }
        };
        if let Some(session) = session {
            release(session, &self.event_tx);
        }
    }

    fn connection_error(&self) -> Option<TransportError> {
        self.session
            .lock()
            .as_ref()
            .filter(|session| session.id == self.id)
            .and_then(|session| session.connection.error())
    }
}

async fn observe<C: Connection>(
    observer: StateObserver<C>,
    mut states: StateReceiver,
    token: CancellationToken,
) {
    loop {
        let state = tokio::select! {
            _ = token.cancelled() => break,
            state = states.recv() => match state {
                Some(state) => state,
                None => break,
            },
        };

        tracing::debug!("Tunnel connection state: {}", state);
        send_event(&observer.event_tx, TunnelEvent::StateChanged(state));

        match state {
            ConnectionState::Connected => observer.on_connected(),
            ConnectionState::Disconnected => {
                if let Some(error) = observer.connection_error() {
                    tracing::warn!("Tunnel disconnected: {}", error);
                }
                observer.close();
                break;
            }
            ConnectionState::Cancelled => {
                observer.close();
                break;
            }
            ConnectionState::Invalid | ConnectionState::Connecting | ConnectionState::Waiting => {}
        }
    }
    tracing::trace!("Tunnel state observer detached");
}

async fn read_loop<C: Connection>(
    connection: Arc<C>,
    max: usize,
    event_tx: UnboundedSender<TunnelEvent>,
) {
    loop {
        match connection.read(0, max).await {
            Ok(Some(data)) => {
                tracing::info!("Received: {}", String::from_utf8_lossy(&data));
                send_event(&event_tx, TunnelEvent::Data(data));
            }
            Ok(None) => {
                tracing::debug!("Tunnel stream ended");
                send_event(&event_tx, TunnelEvent::ReadStopped(None));
                break;
            }
            Err(error) => {
                tracing::error!("Tunnel read failed: {}", error);
                send_event(&event_tx, TunnelEvent::ReadStopped(Some(error)));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use tokio::{
        sync::mpsc::{self, UnboundedReceiver},
        time::timeout,
    };

    use super::*;

    type ScriptedRead = Result<Option<Bytes>, TransportError>;

    struct MockConnection {
        state: Mutex<ConnectionState>,
        error: Mutex<Option<TransportError>>,
        reads: tokio::sync::Mutex<UnboundedReceiver<ScriptedRead>>,
        outstanding: AtomicUsize,
        max_outstanding: AtomicUsize,
        read_calls: AtomicUsize,
        cancels: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Connection for MockConnection {
        fn state(&self) -> ConnectionState {
            *self.state.lock()
        }

        async fn read(&self, _min: usize, max: usize) -> ScriptedRead {
            self.read_calls.fetch_add(1, Ordering::SeqCst);
            let now = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_outstanding.fetch_max(now, Ordering::SeqCst);

            let next = self.reads.lock().await.recv().await;
            tokio::task::yield_now().await;

            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            match next {
                Some(Ok(Some(data))) => Ok(Some(data.slice(..data.len().min(max)))),
                Some(other) => other,
                None => Err(TransportError::Cancelled),
            }
        }

        fn error(&self) -> Option<TransportError> {
            self.error.lock().clone()
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            *self.state.lock() = ConnectionState::Cancelled;
        }
    }

    /// Test side of a mock connection: drives its state and feeds its reads.
    struct Remote {
        connection: Arc<MockConnection>,
        state_tx: UnboundedSender<ConnectionState>,
        read_tx: UnboundedSender<ScriptedRead>,
    }

    impl Remote {
        fn set_state(&self, state: ConnectionState) {
            *self.connection.state.lock() = state;
            let _ = self.state_tx.send(state);
        }

        fn fail(&self, error: TransportError) {
            *self.connection.error.lock() = Some(error);
            self.set_state(ConnectionState::Disconnected);
        }

        fn feed(&self, read: ScriptedRead) {
            self.read_tx.send(read).unwrap();
        }
    }

    #[derive(Clone, Default)]
    struct MockTransport {
        remotes: Arc<Mutex<Vec<Arc<Remote>>>>,
        requests: Arc<Mutex<Vec<(String, u16, bool)>>>,
    }

    impl MockTransport {
        fn remote(&self, index: usize) -> Arc<Remote> {
            self.remotes.lock()[index].clone()
        }
    }

    impl Transport for MockTransport {
        type Connection = MockConnection;

        fn create_connection(
            &self,
            host: &str,
            port: u16,
            enable_tls: bool,
        ) -> Result<(Arc<MockConnection>, StateReceiver), TransportError> {
            self.requests
                .lock()
                .push((host.to_owned(), port, enable_tls));

            let (state_tx, state_rx) = mpsc::unbounded_channel();
            let (read_tx, read_rx) = mpsc::unbounded_channel();
            let connection = Arc::new(MockConnection {
                state: Mutex::new(ConnectionState::Invalid),
                error: Mutex::new(None),
                reads: tokio::sync::Mutex::new(read_rx),
                outstanding: AtomicUsize::new(0),
                max_outstanding: AtomicUsize::new(0),
                read_calls: AtomicUsize::new(0),
                cancels: AtomicUsize::new(0),
            });
            let remote = Arc::new(Remote {
                connection: connection.clone(),
                state_tx,
                read_tx,
            });
            remote.set_state(ConnectionState::Connecting);
            self.remotes.lock().push(remote);
            Ok((connection, state_rx))
        }
    }

    type Completions = Arc<Mutex<Vec<Result<(), TunnelError>>>>;

    fn recording_completion(completions: &Completions) -> OpenCompletion {
        let completions = completions.clone();
        Box::new(move |result| completions.lock().push(result))
    }

    fn tunnel() -> (
        TcpTunnel<MockTransport>,
        MockTransport,
        UnboundedReceiver<TunnelEvent>,
    ) {
        let transport = MockTransport::default();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let tunnel = TcpTunnel::new(
            transport.clone(),
            TunnelConnectionConfig::default(),
            event_tx,
        );
        (tunnel, transport, event_rx)
    }

    async fn next_event(events: &mut UnboundedReceiver<TunnelEvent>) -> TunnelEvent {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for tunnel event")
            .expect("event channel closed")
    }

    async fn wait_for(events: &mut UnboundedReceiver<TunnelEvent>, expected: TunnelEvent) {
        loop {
            if next_event(events).await == expected {
                return;
            }
        }
    }

    async fn wait_until_detached(remote: &Remote) {
        timeout(Duration::from_secs(5), async {
            while !remote.state_tx.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("state observer did not detach");
    }

    #[tokio::test]
    async fn connect_fires_completion_and_reads_sequentially() {
        let (tunnel, transport, mut events) = tunnel();
        let completions = Completions::default();

        tunnel.open(recording_completion(&completions)).unwrap();
        assert_eq!(
            transport.requests.lock().clone(),
            vec![("127.0.0.1".to_owned(), 1190, false)]
        );

        let remote = transport.remote(0);
        remote.set_state(ConnectionState::Connected);
        wait_for(
            &mut events,
            TunnelEvent::StateChanged(ConnectionState::Connected),
        )
        .await;

        for chunk in ["one", "two", "three"] {
            remote.feed(Ok(Some(Bytes::from_static(chunk.as_bytes()))));
        }
        for chunk in ["one", "two", "three"] {
            assert_eq!(
                next_event(&mut events).await,
                TunnelEvent::Data(Bytes::from_static(chunk.as_bytes()))
            );
        }
        remote.feed(Ok(None));
        assert_eq!(next_event(&mut events).await, TunnelEvent::ReadStopped(None));

        assert_eq!(completions.lock().clone(), vec![Ok(())]);
        assert_eq!(remote.connection.max_outstanding.load(Ordering::SeqCst), 1);
        assert_eq!(remote.connection.read_calls.load(Ordering::SeqCst), 4);

        assert!(tunnel.close());
        assert_eq!(completions.lock().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_before_first_read_closes_once() {
        let (tunnel, transport, mut events) = tunnel();
        let completions = Completions::default();

        tunnel.open(recording_completion(&completions)).unwrap();
        let remote = transport.remote(0);
        remote.set_state(ConnectionState::Connected);
        remote.fail(TransportError::Read("connection reset".to_owned()));

        wait_for(&mut events, TunnelEvent::Closed).await;
        wait_until_detached(&remote).await;

        assert_eq!(completions.lock().clone(), vec![Ok(())]);
        assert_eq!(remote.connection.cancels.load(Ordering::SeqCst), 1);
        assert!(remote.connection.read_calls.load(Ordering::SeqCst) <= 1);
        assert!(!tunnel.is_open());

        // Already closed by the disconnect.
        assert!(!tunnel.close());
        assert_eq!(remote.connection.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(completions.lock().len(), 1);
    }

    #[tokio::test]
    async fn close_before_connect_fails_the_completion() {
        let (tunnel, transport, mut events) = tunnel();
        let completions = Completions::default();

        tunnel.open(recording_completion(&completions)).unwrap();
        let remote = transport.remote(0);

        assert!(tunnel.close());
        assert!(!tunnel.close());
        wait_until_detached(&remote).await;

        // A late state change has no effect once the observer is detached.
        remote.set_state(ConnectionState::Connected);

        assert_eq!(
            completions.lock().clone(),
            vec![Err(TunnelError::OpenFailed { source: None })]
        );
        assert_eq!(remote.connection.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(remote.connection.read_calls.load(Ordering::SeqCst), 0);
        wait_for(&mut events, TunnelEvent::Closed).await;
    }

    #[tokio::test]
    async fn cancelled_connection_closes_the_tunnel() {
        let (tunnel, transport, mut events) = tunnel();
        let completions = Completions::default();

        tunnel.open(recording_completion(&completions)).unwrap();
        let remote = transport.remote(0);
        remote.set_state(ConnectionState::Waiting);
        remote.set_state(ConnectionState::Cancelled);

        wait_for(&mut events, TunnelEvent::Closed).await;
        assert!(!tunnel.is_open());
        assert!(matches!(
            completions.lock().as_slice(),
            [Err(TunnelError::OpenFailed { .. })]
        ));
    }

    #[tokio::test]
    async fn read_error_stops_the_loop_without_reconnecting() {
        let (tunnel, transport, mut events) = tunnel();

        tunnel.open(Box::new(|_| {})).unwrap();
        let remote = transport.remote(0);
        remote.set_state(ConnectionState::Connected);
        remote.feed(Err(TransportError::Read("broken pipe".to_owned())));

        wait_for(
            &mut events,
            TunnelEvent::StateChanged(ConnectionState::Connected),
        )
        .await;
        assert_eq!(
            next_event(&mut events).await,
            TunnelEvent::ReadStopped(Some(TransportError::Read("broken pipe".to_owned())))
        );

        remote.feed(Ok(Some(Bytes::from_static(b"ignored"))));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(remote.connection.read_calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.remotes.lock().len(), 1);
        assert!(tunnel.is_open());
    }

    #[tokio::test]
    async fn second_open_is_rejected_until_closed() {
        let (tunnel, transport, _events) = tunnel();
        let completions = Completions::default();

        tunnel.open(recording_completion(&completions)).unwrap();
        assert_eq!(
            tunnel.open(recording_completion(&completions)),
            Err(TunnelError::AlreadyOpen)
        );
        assert_eq!(transport.remotes.lock().len(), 1);

        assert!(tunnel.close());
        tunnel.open(recording_completion(&completions)).unwrap();
        assert_eq!(transport.remotes.lock().len(), 2);

        // The first session's observer must not touch the new one.
        transport.remote(0).set_state(ConnectionState::Disconnected);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(tunnel.is_open());
        assert_eq!(
            transport.remote(1).connection.cancels.load(Ordering::SeqCst),
            0
        );
    }
}
