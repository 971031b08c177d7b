//! Transport-independent client and server.
//!
//! This is the surface an application drives: pick a [`TransportKind`],
//! hand over a [`Config`] and an [`EventSink`], then send or receive items.

use std::net::SocketAddr;
use std::path::Path;

use crate::clipboard::{self, SharedClipboard};
use crate::config::{Config, TransportKind};
use crate::datagram::{self, DatagramClient, DatagramServer};
use crate::error::Result;
use crate::file::resolver;
use crate::stream::{self, StreamClient, StreamServer};
use crate::transfer::EventSink;

/// Sending side over either transport.
#[derive(Debug)]
pub enum Client {
    /// Acknowledged delivery over TCP
    Stream(StreamClient),
    /// Fire-and-forget delivery over UDP
    Datagram(DatagramClient),
}

impl Client {
    /// Connect to `endpoint` using `transport`.
    ///
    /// For the stream transport this waits for the first connection and
    /// applies the configured retry policy. The configured save folder is
    /// created if missing.
    ///
    /// # Errors
    ///
    /// Returns `ConnectFailed` when every stream connect attempt fails, or an
    /// I/O error if the datagram socket cannot be bound.
    pub async fn connect(
        config: &Config,
        endpoint: SocketAddr,
        transport: TransportKind,
        events: EventSink,
    ) -> Result<Self> {
        if let Err(e) = resolver::ensure_dir(&config.general.save_folder).await {
            tracing::warn!("Save folder unavailable: {}", e);
        }

        match transport {
            TransportKind::Tcp => {
                let client =
                    StreamClient::new(endpoint, stream::ClientOptions::from_config(config), events);
                client.connect().await?;
                Ok(Self::Stream(client))
            }
            TransportKind::Udp => {
                let client = DatagramClient::bind(
                    endpoint,
                    datagram::ClientOptions::from_config(config),
                    events,
                )
                .await?;
                Ok(Self::Datagram(client))
            }
        }
    }

    /// Transport this client uses.
    pub const fn transport(&self) -> TransportKind {
        match self {
            Self::Stream(_) => TransportKind::Tcp,
            Self::Datagram(_) => TransportKind::Udp,
        }
    }

    /// Current peer address.
    pub fn peer(&self) -> SocketAddr {
        match self {
            Self::Stream(client) => client.peer(),
            Self::Datagram(client) => client.peer(),
        }
    }

    /// Stop any connect loop and close the connection.
    pub async fn disconnect(&self) {
        match self {
            Self::Stream(client) => client.disconnect().await,
            Self::Datagram(_) => {}
        }
    }

    /// Switch to a new peer.
    pub async fn reconnect(&mut self, endpoint: SocketAddr) -> Result<()> {
        match self {
            Self::Stream(client) => client.reconnect(endpoint).await,
            Self::Datagram(client) => {
                client.set_peer(endpoint);
                Ok(())
            }
        }
    }

    /// Send a text message. Returns the acknowledgment on the stream
    /// transport, `None` on the datagram transport.
    ///
    /// Stream sends first wait for the supervisor to reopen the connection
    /// closed after the previous item.
    ///
    /// # Errors
    ///
    /// `NotConnected` if the supervisor gave up reconnecting.
    pub async fn send_text(&self, text: &str) -> Result<Option<String>> {
        match self {
            Self::Stream(client) => {
                client.wait_connected().await?;
                client.send_text(text).await.map(Some)
            }
            Self::Datagram(client) => client.send_text(text).await.map(|()| None),
        }
    }

    /// Send clipboard text.
    pub async fn send_clipboard(&self, text: &str) -> Result<Option<String>> {
        match self {
            Self::Stream(client) => {
                client.wait_connected().await?;
                client.send_clipboard(text).await.map(Some)
            }
            Self::Datagram(client) => client.send_clipboard(text).await.map(|()| None),
        }
    }

    /// Read text from `source` and send it as clipboard content.
    ///
    /// # Errors
    ///
    /// Returns `ClipboardError` if the clipboard cannot be read.
    pub async fn send_clipboard_from(&self, source: &SharedClipboard) -> Result<Option<String>> {
        let text = clipboard::read_shared(source)?;
        self.send_clipboard(&text).await
    }

    /// Send a single file.
    pub async fn send_file(&self, path: &Path) -> Result<Option<String>> {
        match self {
            Self::Stream(client) => {
                client.wait_connected().await?;
                client.send_file(path).await.map(Some)
            }
            Self::Datagram(client) => client.send_file(path).await.map(|()| None),
        }
    }

    /// Send a folder with its nested structure.
    pub async fn send_folder(&self, path: &Path) -> Result<Option<String>> {
        match self {
            Self::Stream(client) => {
                client.wait_connected().await?;
                client.send_folder(path).await.map(Some)
            }
            Self::Datagram(client) => client.send_folder(path).await.map(|()| None),
        }
    }
}

/// Receiving side over either transport.
#[derive(Debug)]
pub enum Server {
    /// TCP listener with one worker per connection
    Stream(StreamServer),
    /// UDP socket with a single receive loop
    Datagram(DatagramServer),
}

impl Server {
    /// Bind `endpoint` and start receiving into `save_dir`.
    ///
    /// Received clipboard text is only written into a clipboard when one is
    /// attached with [`Server::start_with_clipboard`].
    pub async fn start(
        config: &Config,
        endpoint: SocketAddr,
        transport: TransportKind,
        save_dir: &Path,
        events: EventSink,
    ) -> Result<Self> {
        Self::start_inner(config, endpoint, transport, save_dir, events, None).await
    }

    /// Like [`Server::start`], writing received clipboard text into
    /// `clipboard`.
    pub async fn start_with_clipboard(
        config: &Config,
        endpoint: SocketAddr,
        transport: TransportKind,
        save_dir: &Path,
        events: EventSink,
        clipboard: SharedClipboard,
    ) -> Result<Self> {
        Self::start_inner(config, endpoint, transport, save_dir, events, Some(clipboard)).await
    }

    async fn start_inner(
        config: &Config,
        endpoint: SocketAddr,
        transport: TransportKind,
        save_dir: &Path,
        events: EventSink,
        clipboard: Option<SharedClipboard>,
    ) -> Result<Self> {
        match transport {
            TransportKind::Tcp => {
                let mut options = stream::ServerOptions::from_config(config);
                options.clipboard = clipboard;
                let server = StreamServer::start(endpoint, save_dir, options, events).await?;
                Ok(Self::Stream(server))
            }
            TransportKind::Udp => {
                let mut options = datagram::ServerOptions::from_config(config);
                options.clipboard = clipboard;
                let server = DatagramServer::start(endpoint, save_dir, options, events).await?;
                Ok(Self::Datagram(server))
            }
        }
    }

    /// Transport this server uses.
    pub const fn transport(&self) -> TransportKind {
        match self {
            Self::Stream(_) => TransportKind::Tcp,
            Self::Datagram(_) => TransportKind::Udp,
        }
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        match self {
            Self::Stream(server) => server.local_addr(),
            Self::Datagram(server) => server.local_addr(),
        }
    }

    /// Folder received items are written to.
    pub fn save_dir(&self) -> &Path {
        match self {
            Self::Stream(server) => server.save_dir(),
            Self::Datagram(server) => server.save_dir(),
        }
    }

    /// Rebind on `endpoint`.
    pub async fn restart(&self, endpoint: SocketAddr) -> Result<SocketAddr> {
        match self {
            Self::Stream(server) => server.restart(endpoint).await,
            Self::Datagram(server) => server.restart(endpoint).await,
        }
    }

    /// Stop receiving and release sockets and files.
    pub async fn stop(&self) {
        match self {
            Self::Stream(server) => server.stop().await,
            Self::Datagram(server) => server.stop().await,
        }
    }
}
