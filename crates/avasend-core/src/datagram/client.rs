//! Datagram client.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;

use tokio::net::UdpSocket;
use uuid::Uuid;

use super::ClientOptions;
use crate::error::{Error, Result};
use crate::file::{file_name_of, FileChunker, FolderManifest};
use crate::protocol::{self, Frame};
use crate::transfer::{EventSink, TransferDirection, TransferProgress};

/// Client side of the datagram transport. Holds no connection state.
#[derive(Debug)]
pub struct DatagramClient {
    socket: UdpSocket,
    peer: SocketAddr,
    options: ClientOptions,
    events: EventSink,
}

impl DatagramClient {
    /// Bind an ephemeral local socket for sending to `peer`.
    pub async fn bind(peer: SocketAddr, options: ClientOptions, events: EventSink) -> Result<Self> {
        let local: SocketAddr = match peer.ip() {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await?;
        tracing::debug!(
            "Datagram client bound to {} for {}",
            socket.local_addr()?,
            peer
        );

        Ok(Self {
            socket,
            peer,
            options,
            events,
        })
    }

    /// Address datagrams are sent to.
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send subsequent datagrams to `peer`.
    pub fn set_peer(&mut self, peer: SocketAddr) {
        self.peer = peer;
    }

    /// Send a text message as one datagram.
    ///
    /// # Errors
    ///
    /// Returns `FramingError` if the text does not fit in a datagram.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send_frame(&Frame::Text(text.to_string())).await
    }

    /// Send clipboard text as one datagram.
    pub async fn send_clipboard(&self, text: &str) -> Result<()> {
        self.send_frame(&Frame::Clipboard(text.to_string())).await
    }

    /// Send one file as `F`, `C`..., `E`.
    pub async fn send_file(&self, path: &Path) -> Result<()> {
        let name = file_name_of(path)?;
        let mut chunker = FileChunker::open(path, self.options.chunk_size).await?;
        let size = chunker.size();

        let session_id = Uuid::new_v4();
        tracing::info!(%session_id, "Sending file {} ({} bytes) to {}", name, size, self.peer);

        let mut progress = TransferProgress::new(session_id, &name, TransferDirection::Send, size);
        self.send_frame(&Frame::File { name, size }).await?;
        self.send_chunks(&mut chunker, &mut progress).await?;
        self.send_frame(&Frame::EndOfItem).await
    }

    /// Send a folder as `D`, then `P`, `F`, `C`..., `E` per file, then a
    /// closing `E`.
    pub async fn send_folder(&self, path: &Path) -> Result<()> {
        let manifest = FolderManifest::scan(path)?;
        let file_count = u32::try_from(manifest.len())
            .map_err(|_| Error::FramingError(format!("too many files: {}", manifest.len())))?;

        let session_id = Uuid::new_v4();
        tracing::info!(
            %session_id,
            "Sending folder {} ({} files, {} bytes) to {}",
            manifest.name,
            manifest.len(),
            manifest.total_size,
            self.peer
        );

        let mut progress = TransferProgress::new(
            session_id,
            &manifest.name,
            TransferDirection::Send,
            manifest.total_size,
        );

        self.send_frame(&Frame::Folder {
            name: manifest.name.clone(),
            file_count,
        })
        .await?;

        for entry in &manifest.entries {
            let name = file_name_of(&entry.path)?;
            let mut chunker =
                FileChunker::open_sized(&entry.path, self.options.chunk_size, entry.size).await?;

            self.send_frame(&Frame::PathHint(entry.relative_path.clone()))
                .await?;
            self.send_frame(&Frame::File {
                name,
                size: entry.size,
            })
            .await?;
            self.send_chunks(&mut chunker, &mut progress).await?;
            self.send_frame(&Frame::EndOfItem).await?;
        }

        if manifest.is_empty() {
            self.events.progress_reporter()(&progress);
        }
        self.send_frame(&Frame::EndOfItem).await
    }

    async fn send_chunks(
        &self,
        chunker: &mut FileChunker,
        progress: &mut TransferProgress,
    ) -> Result<()> {
        let mut report = self.events.progress_reporter();

        if chunker.size() == 0 {
            report(progress);
            return Ok(());
        }

        while let Some(chunk) = chunker.next_chunk().await? {
            let len = chunk.len() as u64;
            self.send_frame(&Frame::ChunkData(chunk.to_vec())).await?;
            progress.advance(len);
            report(progress);
        }
        Ok(())
    }

    async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let datagram = protocol::encode_datagram(frame)?;
        self.socket.send_to(&datagram, self.peer).await?;

        if !self.options.pacing.is_zero() {
            tokio::time::sleep(self.options.pacing).await;
        }
        Ok(())
    }
}
