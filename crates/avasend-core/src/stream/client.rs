//! Stream client with supervised reconnection.
//!
//! ```text
//! Disconnected -> Connecting -> Connected <-> Sending
//!                     ^              |
//!                     +-- peer EOF --+
//! ```
//!
//! [`StreamClient::connect`] starts a supervisor task that owns the read
//! half of the socket. Acknowledgments it reads are forwarded to the sender
//! waiting for them; end of stream sends it back into the bounded connect
//! loop. Only [`StreamClient::disconnect`] or exhausted attempts stop it.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::ClientOptions;
use crate::error::{Error, Result};
use crate::file::{file_name_of, FolderManifest};
use crate::protocol::{self, Frame};
use crate::transfer::{
    self, configure_tcp_keepalive, EventSink, TransferDirection, TransferEvent, TransferProgress,
};

/// Connection state published by a [`StreamClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No supervisor running
    Disconnected,
    /// Attempting to (re)connect
    Connecting,
    /// Idle connection ready for an item
    Connected,
    /// An item is being written
    Sending,
}

/// An open connection waiting for one item.
struct Connection {
    writer: OwnedWriteHalf,
    acks: mpsc::UnboundedReceiver<String>,
}

/// State shared with the supervisor task.
struct Shared {
    options: ClientOptions,
    events: EventSink,
    state: watch::Sender<ConnectionState>,
    connection: Mutex<Option<Connection>>,
}

#[derive(Default)]
struct Control {
    cancel: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

/// Client side of the stream transport.
pub struct StreamClient {
    peer: StdMutex<SocketAddr>,
    shared: Arc<Shared>,
    control: StdMutex<Control>,
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("peer", &self.peer())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl StreamClient {
    /// Create a client for `peer`. Nothing happens until [`connect`](Self::connect).
    pub fn new(peer: SocketAddr, options: ClientOptions, events: EventSink) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            peer: StdMutex::new(peer),
            shared: Arc::new(Shared {
                options,
                events,
                state,
                connection: Mutex::new(None),
            }),
            control: StdMutex::new(Control::default()),
        }
    }

    /// Address this client connects to.
    pub fn peer(&self) -> SocketAddr {
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Connect to the peer, retrying up to `max_connect_attempts` times.
    ///
    /// Returns once the first connection is open. Calling this while a
    /// supervisor is already running is a no-op.
    ///
    /// # Errors
    ///
    /// `ConnectFailed` when every attempt failed, `Cancelled` when
    /// [`disconnect`](Self::disconnect) interrupted the attempts.
    pub async fn connect(&self) -> Result<()> {
        let first = {
            let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
            if control
                .supervisor
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
            {
                return Ok(());
            }

            let cancel = CancellationToken::new();
            let (first_tx, first_rx) = oneshot::channel();
            let handle = tokio::spawn(supervise(
                Arc::clone(&self.shared),
                self.peer(),
                cancel.clone(),
                first_tx,
            ));
            control.cancel = cancel;
            control.supervisor = Some(handle);
            first_rx
        };

        first.await.unwrap_or(Err(Error::Cancelled))
    }

    /// Stop the supervisor, abort any pending connect or acknowledgment and
    /// close the socket.
    pub async fn disconnect(&self) {
        let (cancel, supervisor) = {
            let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
            (control.cancel.clone(), control.supervisor.take())
        };
        cancel.cancel();

        if let Some(mut connection) = self.shared.connection.lock().await.take() {
            let _ = connection.writer.shutdown().await;
        }
        if let Some(handle) = supervisor {
            let _ = handle.await;
        }

        self.shared.state.send_replace(ConnectionState::Disconnected);
    }

    /// Disconnect and connect to a different peer.
    pub async fn reconnect(&self, peer: SocketAddr) -> Result<()> {
        self.disconnect().await;
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner) = peer;
        self.connect().await
    }

    /// Wait until the supervisor holds an idle connection.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` if the supervisor stops instead.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut rx = self.shared.state.subscribe();
        let state = *rx
            .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Disconnected))
            .await
            .map_err(|_| Error::NotConnected)?;

        if state == ConnectionState::Connected {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Send a text message and return the server's acknowledgment.
    pub async fn send_text(&self, text: &str) -> Result<String> {
        let mut connection = self.take_connection().await?;
        let written = self
            .write_item(protocol::write_frame(
                &mut connection.writer,
                &Frame::Text(text.to_string()),
            ))
            .await;
        self.finish(connection, written).await
    }

    /// Send clipboard text and return the server's acknowledgment.
    pub async fn send_clipboard(&self, text: &str) -> Result<String> {
        let mut connection = self.take_connection().await?;
        let written = self
            .write_item(protocol::write_frame(
                &mut connection.writer,
                &Frame::Clipboard(text.to_string()),
            ))
            .await;
        self.finish(connection, written).await
    }

    /// Send one file and return the server's acknowledgment.
    ///
    /// # Errors
    ///
    /// `SourceUnavailable` if the file cannot be read, `NotConnected` if no
    /// idle connection is open.
    pub async fn send_file(&self, path: &Path) -> Result<String> {
        let name = file_name_of(path)?;
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::SourceUnavailable {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        if !metadata.is_file() {
            return Err(Error::SourceUnavailable {
                path: path.display().to_string(),
                reason: "not a regular file".to_string(),
            });
        }
        let size = metadata.len();

        let mut connection = self.take_connection().await?;
        let session_id = Uuid::new_v4();
        tracing::info!(%session_id, "Sending file {} ({} bytes) to {}", name, size, self.peer());

        let chunk_size = self.shared.options.chunk_size;
        let events = &self.shared.events;
        let writer = &mut connection.writer;
        let written = self
            .write_item(async {
                protocol::write_frame(writer, &Frame::File { name: name.clone(), size }).await?;
                let mut progress =
                    TransferProgress::new(session_id, &name, TransferDirection::Send, size);
                let mut report = events.progress_reporter();
                transfer::send_file(writer, path, size, chunk_size, &mut progress, &mut report)
                    .await
            })
            .await;

        self.finish(connection, written).await
    }

    /// Send a folder recursively and return the server's acknowledgment.
    pub async fn send_folder(&self, path: &Path) -> Result<String> {
        let manifest = FolderManifest::scan(path)?;

        let mut connection = self.take_connection().await?;
        let session_id = Uuid::new_v4();
        tracing::info!(
            %session_id,
            "Sending folder {} ({} files, {} bytes) to {}",
            manifest.name,
            manifest.len(),
            manifest.total_size,
            self.peer()
        );

        let mut progress = TransferProgress::new(
            session_id,
            &manifest.name,
            TransferDirection::Send,
            manifest.total_size,
        );
        let mut report = self.shared.events.progress_reporter();
        let written = self
            .write_item(transfer::send_folder(
                &mut connection.writer,
                &manifest,
                self.shared.options.chunk_size,
                &mut progress,
                &mut report,
            ))
            .await;

        self.finish(connection, written).await
    }

    async fn take_connection(&self) -> Result<Connection> {
        let connection = self
            .shared
            .connection
            .lock()
            .await
            .take()
            .ok_or(Error::NotConnected)?;
        self.shared.state.send_replace(ConnectionState::Sending);
        Ok(connection)
    }

    fn cancel_token(&self) -> CancellationToken {
        self.control
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel
            .clone()
    }

    /// Run the write half of a send until it finishes or the client is
    /// disconnected. A cancelled write leaves the item half sent; dropping
    /// the connection afterwards closes the socket.
    async fn write_item<F>(&self, write: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let cancel = self.cancel_token();
        tokio::select! {
            () = cancel.cancelled() => Err(Error::Cancelled),
            written = write => written,
        }
    }

    /// Wait for the acknowledgment of a written item. The connection is
    /// spent either way; the server closes it after answering.
    async fn finish(&self, mut connection: Connection, written: Result<()>) -> Result<String> {
        if let Err(e) = written {
            tracing::warn!("Send to {} failed: {}", self.peer(), e);
            return Err(e);
        }

        let cancel = self.cancel_token();
        let message = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            ack = connection.acks.recv() => ack.ok_or(Error::TransportClosed)?,
        };

        tracing::debug!("Acknowledged by {}: {}", self.peer(), message);
        self.shared.events.emit(TransferEvent::Acknowledged {
            message: message.clone(),
        });
        Ok(message)
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        let control = self.control.get_mut().unwrap_or_else(PoisonError::into_inner);
        control.cancel.cancel();
    }
}

/// Try to reach `peer` at most `max_connect_attempts` times.
async fn connect_with_retry(
    peer: SocketAddr,
    options: &ClientOptions,
    cancel: &CancellationToken,
) -> Result<TcpStream> {
    let attempts = options.max_connect_attempts.max(1);

    for attempt in 1..=attempts {
        tracing::debug!("Connecting to {} (attempt {}/{})", peer, attempt, attempts);

        let result = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            r = tokio::time::timeout(options.connect_timeout, TcpStream::connect(peer)) => r,
        };

        match result {
            Ok(Ok(stream)) => {
                if options.keep_alive {
                    if let Err(e) = configure_tcp_keepalive(&stream) {
                        tracing::warn!("Failed to enable keep-alive: {}", e);
                    }
                }
                tracing::info!("Connected to {}", peer);
                return Ok(stream);
            }
            Ok(Err(e)) => tracing::warn!("Connect to {} failed: {}", peer, e),
            Err(_) => tracing::warn!(
                "Connect to {} timed out after {}ms",
                peer,
                options.connect_timeout.as_millis()
            ),
        }

        if attempt < attempts {
            tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                () = tokio::time::sleep(options.retry_delay) => {}
            }
        }
    }

    Err(Error::ConnectFailed {
        addr: peer,
        attempts,
    })
}

async fn supervise(
    shared: Arc<Shared>,
    peer: SocketAddr,
    cancel: CancellationToken,
    first: oneshot::Sender<Result<()>>,
) {
    let mut first = Some(first);

    loop {
        shared.state.send_replace(ConnectionState::Connecting);

        let stream = match connect_with_retry(peer, &shared.options, &cancel).await {
            Ok(stream) => stream,
            Err(e) => {
                shared.state.send_replace(ConnectionState::Disconnected);
                match first.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(e));
                    }
                    None => {
                        tracing::error!("Giving up on {}: {}", peer, e);
                        shared.events.error(&e);
                    }
                }
                return;
            }
        };

        let (mut reader, writer) = stream.into_split();
        let (ack_tx, acks) = mpsc::unbounded_channel();
        *shared.connection.lock().await = Some(Connection { writer, acks });

        shared.state.send_replace(ConnectionState::Connected);
        shared.events.emit(TransferEvent::Connected { peer });
        if let Some(tx) = first.take() {
            let _ = tx.send(Ok(()));
        }

        let cancelled = watch_connection(&mut reader, &ack_tx, &cancel).await;
        drop(ack_tx);
        shared.connection.lock().await.take();
        shared.events.emit(TransferEvent::Disconnected { peer });

        if cancelled {
            shared.state.send_replace(ConnectionState::Disconnected);
            return;
        }
        tracing::debug!("Connection to {} closed, reconnecting", peer);
    }
}

/// Forward acknowledgments until the peer closes. Returns `true` if the
/// watch ended because of cancellation.
async fn watch_connection(
    reader: &mut OwnedReadHalf,
    acks: &mpsc::UnboundedSender<String>,
    cancel: &CancellationToken,
) -> bool {
    loop {
        tokio::select! {
            () = cancel.cancelled() => return true,
            result = protocol::read_ack(reader) => match result {
                Ok(message) => {
                    let _ = acks.send(message);
                }
                Err(Error::TransportClosed) => return false,
                Err(e) => {
                    tracing::warn!("Dropping connection after bad acknowledgment: {}", e);
                    return false;
                }
            },
        }
    }
}
