//! Datagram server.
//!
//! A single receive loop decodes each datagram and feeds it to one
//! [`ServerSession`]. Errors are logged and reported as events; the loop
//! keeps going.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex as StdMutex, PoisonError};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::ServerOptions;
use crate::clipboard::{self, SharedClipboard};
use crate::error::{Error, Result};
use crate::file::{format_size, resolver, FileWriter};
use crate::protocol::{self, Frame, MAX_DATAGRAM_SIZE};
use crate::transfer::{EventSink, ReceivedItem, TransferDirection, TransferEvent, TransferProgress};

/// What received datagrams are applied to.
#[derive(Clone)]
pub struct SessionContext {
    /// Folder received items are written to
    pub save_dir: PathBuf,
    /// Event destination
    pub events: EventSink,
    /// Where received clipboard text is written, if anywhere
    pub clipboard: Option<SharedClipboard>,
}

/// A file being written from `C` datagrams.
#[derive(Debug)]
pub struct OpenFile {
    name: String,
    writer: FileWriter,
    progress: TransferProgress,
}

impl OpenFile {
    async fn create(name: String, dest: PathBuf, size: u64) -> Result<Self> {
        let session_id = Uuid::new_v4();
        tracing::debug!(%session_id, "Receiving {} ({} bytes) into {}", name, size, dest.display());
        let writer = FileWriter::create(dest, size).await?;
        let progress = TransferProgress::new(session_id, &name, TransferDirection::Receive, size);
        Ok(Self {
            name,
            writer,
            progress,
        })
    }

    async fn write(&mut self, data: &[u8], events: &EventSink) -> Result<()> {
        self.writer.write(data).await?;
        self.progress.advance(data.len() as u64);
        events.emit(TransferEvent::Progress(self.progress.clone()));
        Ok(())
    }

    /// Close the file. A short file stays on disk but is reported as an
    /// error instead of a received item.
    async fn finish(self, from: SocketAddr, events: &EventSink) -> Result<()> {
        let Self {
            name,
            writer,
            progress,
        } = self;

        if progress.total_bytes == 0 {
            events.emit(TransferEvent::Progress(progress.clone()));
        }

        let complete = writer.is_complete();
        let written = writer.bytes_written();
        let expected = writer.expected_size();
        let path = writer.output_path.clone();
        let sha256 = writer.finalize().await?;

        if !complete {
            return Err(Error::FramingError(format!(
                "{name} incomplete: {written} of {expected} bytes arrived"
            )));
        }

        tracing::info!(
            session_id = %progress.session_id,
            "Saved {} ({}) from {}",
            path.display(),
            format_size(written),
            from
        );
        events.item_received(&ReceivedItem {
            name,
            path,
            size: written,
            sha256,
        });
        Ok(())
    }
}

/// An incoming folder: files land under `root`.
#[derive(Debug)]
pub struct FolderReceipt {
    name: String,
    root: PathBuf,
    pending_path: Option<String>,
    file: Option<OpenFile>,
}

impl FolderReceipt {
    /// Folder name as announced by the sender.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local folder files are written into.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Receive state of the datagram server.
#[derive(Debug, Default)]
pub enum ServerSession {
    /// Nothing open
    #[default]
    Idle,
    /// A path hint arrived outside a folder; the next file lands there
    PendingPath(String),
    /// A standalone file is open
    ReceivingFile(OpenFile),
    /// A folder is open, possibly with one of its files
    ReceivingFolder(FolderReceipt),
}

impl ServerSession {
    /// Whether nothing is open.
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Apply one decoded datagram from `from`.
    ///
    /// # Errors
    ///
    /// Returns `FramingError` for datagrams that do not fit the current
    /// state, `InvalidPath` for unsafe names, and I/O or destination errors
    /// from the file system. The session stays usable after any error.
    pub async fn handle(
        &mut self,
        frame: Frame,
        from: SocketAddr,
        context: &SessionContext,
    ) -> Result<()> {
        match frame {
            Frame::Text(text) => {
                tracing::info!("Text from {} ({} bytes)", from, text.len());
                context
                    .events
                    .emit(TransferEvent::TextReceived { from, text });
            }
            Frame::Clipboard(text) => {
                tracing::info!("Clipboard from {} ({} bytes)", from, text.len());
                if let Some(target) = &context.clipboard {
                    clipboard::write_shared(target, &text)?;
                }
                context
                    .events
                    .emit(TransferEvent::ClipboardReceived { from, text });
            }
            Frame::Folder { name, file_count } => {
                let root = resolver::folder_root(&context.save_dir, &name).await?;
                tracing::info!(
                    "Folder {} ({} files) from {} into {}",
                    name,
                    file_count,
                    from,
                    root.display()
                );
                self.abandon("a new folder started");
                *self = Self::ReceivingFolder(FolderReceipt {
                    name,
                    root,
                    pending_path: None,
                    file: None,
                });
            }
            Frame::PathHint(path) => {
                if let Self::ReceivingFolder(folder) = self {
                    folder.pending_path = Some(path);
                } else {
                    self.abandon("a path hint arrived");
                    *self = Self::PendingPath(path);
                }
            }
            Frame::File { name, size } => {
                if let Self::ReceivingFolder(folder) = self {
                    let relative = folder.pending_path.take().unwrap_or(name);
                    if let Some(previous) = folder.file.take() {
                        tracing::warn!("Abandoning unfinished {}", previous.name);
                    }
                    let dest = resolver::resolve(&folder.root, &relative).await?;
                    folder.file = Some(OpenFile::create(relative, dest, size).await?);
                } else {
                    let relative = match std::mem::take(self) {
                        Self::PendingPath(path) => path,
                        other => {
                            *self = other;
                            self.abandon("a new file started");
                            name
                        }
                    };
                    let dest = resolver::resolve(&context.save_dir, &relative).await?;
                    let file = OpenFile::create(relative, dest, size).await?;
                    *self = Self::ReceivingFile(file);
                }
            }
            Frame::ChunkData(data) => {
                let file = self
                    .open_file_mut()
                    .ok_or_else(|| Error::FramingError("chunk with no open file".into()))?;
                file.write(&data, &context.events).await?;
            }
            Frame::EndOfItem => match std::mem::take(self) {
                Self::ReceivingFile(file) => file.finish(from, &context.events).await?,
                Self::ReceivingFolder(mut folder) => {
                    if let Some(file) = folder.file.take() {
                        *self = Self::ReceivingFolder(folder);
                        file.finish(from, &context.events).await?;
                    } else {
                        tracing::info!("Folder {} complete", folder.name);
                    }
                }
                Self::Idle | Self::PendingPath(_) => {
                    return Err(Error::FramingError("end of item with nothing open".into()));
                }
            },
        }
        Ok(())
    }

    fn open_file_mut(&mut self) -> Option<&mut OpenFile> {
        match self {
            Self::ReceivingFile(file) => Some(file),
            Self::ReceivingFolder(folder) => folder.file.as_mut(),
            Self::Idle | Self::PendingPath(_) => None,
        }
    }

    fn abandon(&mut self, reason: &str) {
        match std::mem::take(self) {
            Self::Idle => {}
            Self::PendingPath(path) => {
                tracing::debug!("Dropping path hint {:?}: {}", path, reason);
            }
            Self::ReceivingFile(file) => {
                tracing::warn!("Abandoning unfinished {}: {}", file.name, reason);
            }
            Self::ReceivingFolder(folder) => {
                tracing::warn!("Abandoning unfinished folder {}: {}", folder.name, reason);
            }
        }
    }
}

struct Receiver {
    token: CancellationToken,
    handle: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// Server side of the datagram transport.
pub struct DatagramServer {
    context: SessionContext,
    options: ServerOptions,
    receiver: tokio::sync::Mutex<Option<Receiver>>,
    local_addr: StdMutex<SocketAddr>,
}

impl std::fmt::Debug for DatagramServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramServer")
            .field("local_addr", &self.local_addr())
            .field("save_dir", &self.context.save_dir)
            .finish_non_exhaustive()
    }
}

impl DatagramServer {
    /// Bind `endpoint` and start the receive loop.
    ///
    /// The save folder is created if missing.
    pub async fn start(
        endpoint: SocketAddr,
        save_dir: &Path,
        options: ServerOptions,
        events: EventSink,
    ) -> Result<Self> {
        resolver::ensure_dir(save_dir).await?;

        let context = SessionContext {
            save_dir: save_dir.to_path_buf(),
            events,
            clipboard: options.clipboard.clone(),
        };
        let receiver = spawn_receiver(endpoint, &context, &options)?;
        let local_addr = receiver.local_addr;

        Ok(Self {
            context,
            options,
            receiver: tokio::sync::Mutex::new(Some(receiver)),
            local_addr: StdMutex::new(local_addr),
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Folder received items are written to.
    pub fn save_dir(&self) -> &Path {
        &self.context.save_dir
    }

    /// Stop the receive loop and bind `endpoint` instead. Any item in
    /// progress is abandoned.
    pub async fn restart(&self, endpoint: SocketAddr) -> Result<SocketAddr> {
        let mut slot = self.receiver.lock().await;
        if let Some(old) = slot.take() {
            old.token.cancel();
            let _ = old.handle.await;
        }

        let receiver = spawn_receiver(endpoint, &self.context, &self.options)?;
        let local_addr = receiver.local_addr;
        *slot = Some(receiver);
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = local_addr;

        tracing::info!("Datagram server restarted on {}", local_addr);
        Ok(local_addr)
    }

    /// Stop the receive loop and wait for it to release the socket.
    pub async fn stop(&self) {
        if let Some(receiver) = self.receiver.lock().await.take() {
            receiver.token.cancel();
            let _ = receiver.handle.await;
        }
        tracing::info!("Datagram server stopped");
    }
}

impl Drop for DatagramServer {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.get_mut().as_ref() {
            receiver.token.cancel();
        }
    }
}

fn bind_socket(endpoint: SocketAddr, receive_buffer_size: usize) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(endpoint), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;

    if receive_buffer_size > 0 {
        if let Err(e) = socket.set_recv_buffer_size(receive_buffer_size) {
            tracing::warn!(
                "Could not set receive buffer to {} bytes: {}",
                receive_buffer_size,
                e
            );
        }
    }

    socket.bind(&endpoint.into())?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

fn spawn_receiver(
    endpoint: SocketAddr,
    context: &SessionContext,
    options: &ServerOptions,
) -> Result<Receiver> {
    let socket = bind_socket(endpoint, options.receive_buffer_size)?;
    let local_addr = socket.local_addr()?;
    tracing::info!("Datagram server listening on {}", local_addr);

    let token = CancellationToken::new();
    let handle = tokio::spawn(receive_loop(socket, context.clone(), token.clone()));

    Ok(Receiver {
        token,
        handle,
        local_addr,
    })
}

async fn receive_loop(socket: UdpSocket, context: SessionContext, token: CancellationToken) {
    let mut session = ServerSession::Idle;
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let received = tokio::select! {
            () = token.cancelled() => break,
            r = socket.recv_from(&mut buf) => r,
        };

        let (len, from) = match received {
            Ok(received) => received,
            Err(e) => {
                // ICMP port-unreachable surfaces here on some platforms
                tracing::debug!("Datagram receive failed: {}", e);
                continue;
            }
        };

        let result = match protocol::decode_datagram(&buf[..len]) {
            Ok(frame) => session.handle(frame, from, &context).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!("Datagram from {} rejected: {}", from, e);
            context.events.error(&e);
        }
    }

    if !session.is_idle() {
        tracing::warn!("Datagram server stopped with an item in progress");
    }
    tracing::debug!("Receive loop finished");
}
