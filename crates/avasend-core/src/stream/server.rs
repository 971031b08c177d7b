//! Stream server.
//!
//! Accepts connections and hands each one to a worker task. A worker reads
//! exactly one item, stores it under the save folder, acknowledges it and
//! closes the connection.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use super::{ServerOptions, ACK_CLIPBOARD, ACK_FILE, ACK_FOLDER, ACK_TEXT};
use crate::clipboard;
use crate::error::{Error, Result};
use crate::file::{format_size, resolver};
use crate::protocol::{self, Frame};
use crate::transfer::{
    self, configure_tcp_keepalive, EventSink, ReceivedItem, TransferDirection, TransferEvent,
    TransferProgress,
};

/// Everything a worker needs; shared read-only between workers.
struct WorkerContext {
    save_dir: PathBuf,
    options: ServerOptions,
    events: EventSink,
}

struct Listener {
    token: CancellationToken,
    handle: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// Server side of the stream transport.
pub struct StreamServer {
    context: Arc<WorkerContext>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    listener: tokio::sync::Mutex<Option<Listener>>,
    local_addr: StdMutex<SocketAddr>,
}

impl std::fmt::Debug for StreamServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamServer")
            .field("local_addr", &self.local_addr())
            .field("save_dir", &self.context.save_dir)
            .finish_non_exhaustive()
    }
}

impl StreamServer {
    /// Bind `endpoint` and start accepting connections.
    ///
    /// The save folder is created if missing.
    ///
    /// # Errors
    ///
    /// Returns `DestinationError` if the save folder cannot be created and
    /// an I/O error if binding fails on every attempt.
    pub async fn start(
        endpoint: SocketAddr,
        save_dir: &Path,
        options: ServerOptions,
        events: EventSink,
    ) -> Result<Self> {
        resolver::ensure_dir(save_dir).await?;

        let context = Arc::new(WorkerContext {
            save_dir: save_dir.to_path_buf(),
            options,
            events,
        });
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        let listener = spawn_listener(endpoint, &context, &shutdown, &tracker).await?;
        let local_addr = listener.local_addr;

        Ok(Self {
            context,
            shutdown,
            tracker,
            listener: tokio::sync::Mutex::new(Some(listener)),
            local_addr: StdMutex::new(local_addr),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Folder received items are written to.
    pub fn save_dir(&self) -> &Path {
        &self.context.save_dir
    }

    /// Close the current listener and bind `endpoint` instead.
    ///
    /// Connections already being served keep running.
    pub async fn restart(&self, endpoint: SocketAddr) -> Result<SocketAddr> {
        let mut slot = self.listener.lock().await;
        if let Some(old) = slot.take() {
            old.token.cancel();
            let _ = old.handle.await;
        }

        let listener = spawn_listener(endpoint, &self.context, &self.shutdown, &self.tracker).await?;
        let local_addr = listener.local_addr;
        *slot = Some(listener);
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = local_addr;

        tracing::info!("Stream server restarted on {}", local_addr);
        Ok(local_addr)
    }

    /// Stop accepting, cancel every worker and wait until all of them have
    /// released their sockets and files.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        if let Some(listener) = self.listener.lock().await.take() {
            let _ = listener.handle.await;
        }
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("Stream server stopped");
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn bind_with_retry(endpoint: SocketAddr, options: &ServerOptions) -> Result<TcpListener> {
    let attempts = options.max_bind_attempts.max(1);
    let mut attempt = 1;
    loop {
        match TcpListener::bind(endpoint).await {
            Ok(listener) => return Ok(listener),
            Err(e) if attempt < attempts => {
                tracing::warn!(
                    "Bind {} failed (attempt {}/{}): {}",
                    endpoint,
                    attempt,
                    attempts,
                    e
                );
                attempt += 1;
                tokio::time::sleep(options.retry_delay).await;
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
}

async fn spawn_listener(
    endpoint: SocketAddr,
    context: &Arc<WorkerContext>,
    shutdown: &CancellationToken,
    tracker: &TaskTracker,
) -> Result<Listener> {
    let listener = bind_with_retry(endpoint, &context.options).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("Stream server listening on {}", local_addr);

    let token = shutdown.child_token();
    let handle = tokio::spawn(accept_loop(
        listener,
        Arc::clone(context),
        token.clone(),
        shutdown.clone(),
        tracker.clone(),
    ));

    Ok(Listener {
        token,
        handle,
        local_addr,
    })
}

async fn accept_loop(
    mut listener: TcpListener,
    context: Arc<WorkerContext>,
    token: CancellationToken,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    let mut failures = 0u32;

    loop {
        let accepted = tokio::select! {
            () = token.cancelled() => break,
            r = listener.accept() => r,
        };

        match accepted {
            Ok((stream, peer)) => {
                failures = 0;
                tracing::info!("Connection from {}", peer);
                let context = Arc::clone(&context);
                let shutdown = shutdown.clone();
                tracker.spawn(async move {
                    handle_connection(stream, peer, &context, &shutdown).await;
                });
            }
            Err(e) => {
                failures += 1;
                tracing::warn!("Accept failed: {}", e);

                if failures < context.options.max_bind_attempts {
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = tokio::time::sleep(context.options.retry_delay) => {}
                    }
                    continue;
                }

                let Ok(endpoint) = listener.local_addr() else {
                    break;
                };
                tracing::warn!("Rebinding {} after {} accept failures", endpoint, failures);
                drop(listener);
                match bind_with_retry(endpoint, &context.options).await {
                    Ok(rebound) => {
                        listener = rebound;
                        failures = 0;
                    }
                    Err(e) => {
                        tracing::error!("Stream server could not rebind {}: {}", endpoint, e);
                        context.events.error(&e);
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!("Accept loop finished");
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    context: &WorkerContext,
    shutdown: &CancellationToken,
) {
    let session_id = Uuid::new_v4();
    if context.options.keep_alive {
        if let Err(e) = configure_tcp_keepalive(&stream) {
            tracing::warn!("Failed to enable keep-alive for {}: {}", peer, e);
        }
    }
    context.events.emit(TransferEvent::Connected { peer });

    let result = tokio::select! {
        () = shutdown.cancelled() => Err(Error::Cancelled),
        r = serve_item(&mut stream, peer, session_id, context) => r,
    };

    match result {
        Ok(()) => {}
        Err(Error::Cancelled) => {
            tracing::debug!(%session_id, "Connection from {} cancelled by shutdown", peer);
        }
        Err(e) => {
            tracing::warn!(%session_id, "Connection from {} failed: {}", peer, e);
            context.events.error(&e);
        }
    }

    context.events.emit(TransferEvent::Disconnected { peer });
}

async fn serve_item(
    stream: &mut TcpStream,
    peer: SocketAddr,
    session_id: Uuid,
    context: &WorkerContext,
) -> Result<()> {
    let (mut reader, mut writer) = stream.split();

    let Some(frame) = protocol::read_frame(&mut reader).await? else {
        tracing::debug!("{} closed the connection without sending an item", peer);
        return Ok(());
    };

    let events = &context.events;
    let ack = match frame {
        Frame::Text(text) => {
            tracing::info!(%session_id, "Text from {} ({} bytes)", peer, text.len());
            events.emit(TransferEvent::TextReceived { from: peer, text });
            ACK_TEXT
        }
        Frame::Clipboard(text) => {
            tracing::info!(%session_id, "Clipboard from {} ({} bytes)", peer, text.len());
            if let Some(target) = &context.options.clipboard {
                clipboard::write_shared(target, &text)?;
            }
            events.emit(TransferEvent::ClipboardReceived { from: peer, text });
            ACK_CLIPBOARD
        }
        Frame::File { name, size } => {
            let dest = resolver::resolve(&context.save_dir, &name).await?;
            let mut progress =
                TransferProgress::new(session_id, &name, TransferDirection::Receive, size);
            let mut report = events.progress_reporter();
            let sha256 =
                transfer::receive_file(&mut reader, &dest, size, &mut progress, &mut report)
                    .await?;

            tracing::info!(
                %session_id,
                "Saved {} ({}) from {}",
                dest.display(),
                format_size(size),
                peer
            );
            events.item_received(&ReceivedItem {
                name,
                path: dest,
                size,
                sha256,
            });
            ACK_FILE
        }
        Frame::Folder { name, file_count } => {
            let root = resolver::folder_root(&context.save_dir, &name).await?;
            let mut report = events.progress_reporter();
            let mut announce = |item: &ReceivedItem| events.item_received(item);
            let items = transfer::receive_folder(
                &mut reader,
                &root,
                file_count,
                session_id,
                &mut report,
                &mut announce,
            )
            .await?;

            tracing::info!(
                %session_id,
                "Saved folder {} ({} files) from {}",
                root.display(),
                items.len(),
                peer
            );
            ACK_FOLDER
        }
        other => {
            return Err(Error::FramingError(format!(
                "unexpected {:?} frame on stream",
                other.kind()
            )));
        }
    };

    protocol::write_ack(&mut writer, ack).await?;
    writer.shutdown().await?;
    Ok(())
}
