//! Transfer engine for AvaSend.
//!
//! This module moves file bytes between a local file and a socket half:
//!
//! - Chunked sending through [`FileChunker`]
//! - Receiving into a [`FileWriter`] with a running SHA-256
//! - Folder transfers over the stream binding
//! - Progress accounting and the [`TransferEvent`] contract
//!
//! ## Transfer Protocol
//!
//! - Default chunk size: 8 KiB
//! - File bytes follow their header unframed; the receiver stops at the
//!   announced size and never reads past it
//! - A folder reports progress against the aggregate size of all its files

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, ErrorKind, Result};
use crate::file::{resolver, FileChunker, FileWriter, FolderManifest};
use crate::protocol::{self, Frame};

/// Receive buffer size for unframed file bytes.
const RECEIVE_BUFFER_SIZE: usize = 64 * 1024;

/// Configure TCP keep-alive on a socket.
///
/// Start probing after 10 seconds of idle time and send probes every
/// 5 seconds.
pub(crate) fn configure_tcp_keepalive(stream: &TcpStream) -> Result<()> {
    let socket_ref = SockRef::from(stream);

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(10))
        .with_interval(Duration::from_secs(5));

    socket_ref
        .set_tcp_keepalive(&keepalive)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    tracing::debug!("TCP keep-alive enabled on socket");
    Ok(())
}

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Sending to the peer
    Send,
    /// Receiving from the peer
    Receive,
}

/// Progress information for one item.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// Session this item belongs to, for log correlation
    pub session_id: Uuid,
    /// Name of the file or folder
    pub item: String,
    /// Which way the bytes flow
    pub direction: TransferDirection,
    /// Bytes moved so far
    pub bytes_transferred: u64,
    /// Bytes expected in total
    pub total_bytes: u64,
    /// Transfer speed in bytes per second
    pub speed_bps: u64,
    /// When the item started
    pub started_at: Instant,
}

impl TransferProgress {
    /// Create a new progress tracker.
    #[must_use]
    pub fn new(
        session_id: Uuid,
        item: impl Into<String>,
        direction: TransferDirection,
        total_bytes: u64,
    ) -> Self {
        Self {
            session_id,
            item: item.into(),
            direction,
            bytes_transferred: 0,
            total_bytes,
            speed_bps: 0,
            started_at: Instant::now(),
        }
    }

    /// Record `bytes` more transferred and refresh the speed estimate.
    pub fn advance(&mut self, bytes: u64) {
        self.bytes_transferred = (self.bytes_transferred + bytes).min(self.total_bytes);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                self.speed_bps = (self.bytes_transferred as f64 / elapsed) as u64;
            }
        }
    }

    /// Completed fraction in `0.0..=1.0`; empty items count as done.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        } else {
            self.bytes_transferred as f64 / self.total_bytes as f64
        }
    }

    /// Get progress as a percentage (0.0 - 100.0).
    #[must_use]
    pub fn percentage(&self) -> f64 {
        self.fraction() * 100.0
    }

    /// Whether every expected byte has moved.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.bytes_transferred >= self.total_bytes
    }
}

/// Notification delivered to the embedding application.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// A connection to or from `peer` is open
    Connected {
        /// Remote address
        peer: SocketAddr,
    },
    /// The connection to `peer` went away
    Disconnected {
        /// Remote address
        peer: SocketAddr,
    },
    /// Bytes moved for the current item
    Progress(TransferProgress),
    /// A file was saved to disk
    ItemReceived {
        /// Name as sent by the peer
        name: String,
        /// Where it was saved
        path: PathBuf,
        /// Size in bytes
        size: u64,
        /// Local time of completion
        received_at: DateTime<Local>,
    },
    /// A text message arrived
    TextReceived {
        /// Sender address
        from: SocketAddr,
        /// Message body
        text: String,
    },
    /// Clipboard text arrived
    ClipboardReceived {
        /// Sender address
        from: SocketAddr,
        /// Clipboard contents
        text: String,
    },
    /// The server confirmed an item
    Acknowledged {
        /// Acknowledgment text
        message: String,
    },
    /// Something failed; the session it belonged to is gone
    Error {
        /// Category of the failure
        kind: ErrorKind,
        /// Human readable description
        message: String,
    },
}

/// Sending half of the event channel. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<TransferEvent>>,
}

impl EventSink {
    /// Create a sink and the receiver the application listens on.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { tx: None }
    }

    /// Deliver an event. A closed receiver is not an error.
    pub fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    /// Report an error as an [`TransferEvent::Error`].
    pub fn error(&self, err: &Error) {
        self.emit(TransferEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    /// Report a saved file.
    pub fn item_received(&self, item: &ReceivedItem) {
        self.emit(TransferEvent::ItemReceived {
            name: item.name.clone(),
            path: item.path.clone(),
            size: item.size,
            received_at: Local::now(),
        });
    }

    /// Progress callback that forwards snapshots into this sink.
    pub fn progress_reporter(&self) -> impl FnMut(&TransferProgress) + Send + '_ {
        move |progress: &TransferProgress| self.emit(TransferEvent::Progress(progress.clone()))
    }
}

/// A file that was written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedItem {
    /// Name or relative path as sent by the peer
    pub name: String,
    /// Final location on disk
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// SHA-256 of the written bytes
    pub sha256: [u8; 32],
}

/// Stream `size` bytes of the file at `path` into `writer`.
///
/// `progress` is advanced per chunk and `on_progress` is called after every
/// chunk. A zero-size file produces exactly one report.
///
/// # Errors
///
/// Returns `SourceUnavailable` if the file cannot be read or holds fewer
/// than `size` bytes.
pub async fn send_file<W>(
    writer: &mut W,
    path: &Path,
    size: u64,
    chunk_size: usize,
    progress: &mut TransferProgress,
    on_progress: &mut (dyn FnMut(&TransferProgress) + Send),
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut chunker = FileChunker::open_sized(path, chunk_size, size).await?;

    if chunker.size() == 0 {
        on_progress(progress);
        return Ok(());
    }

    while let Some(chunk) = chunker.next_chunk().await? {
        writer.write_all(chunk).await.map_err(Error::from_read)?;
        progress.advance(chunk.len() as u64);
        on_progress(progress);
    }
    writer.flush().await.map_err(Error::from_read)?;

    Ok(())
}

/// Read exactly `expected_size` bytes from `reader` into a new file at
/// `dest`.
///
/// The partial file is removed if the transfer fails.
///
/// # Errors
///
/// Returns `TransportClosed` if the peer closes before all bytes arrived and
/// `DestinationError` if the file cannot be written.
pub async fn receive_file<R>(
    reader: &mut R,
    dest: &Path,
    expected_size: u64,
    progress: &mut TransferProgress,
    on_progress: &mut (dyn FnMut(&TransferProgress) + Send),
) -> Result<[u8; 32]>
where
    R: AsyncRead + Unpin,
{
    let mut writer = FileWriter::create(dest.to_path_buf(), expected_size).await?;

    match copy_into(reader, &mut writer, progress, on_progress).await {
        Ok(()) => writer.finalize().await,
        Err(e) => {
            writer.discard();
            Err(e)
        }
    }
}

async fn copy_into<R>(
    reader: &mut R,
    writer: &mut FileWriter,
    progress: &mut TransferProgress,
    on_progress: &mut (dyn FnMut(&TransferProgress) + Send),
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    if writer.expected_size() == 0 {
        on_progress(progress);
        return Ok(());
    }

    let mut buffer = vec![0u8; RECEIVE_BUFFER_SIZE];
    while !writer.is_complete() {
        let remaining = writer.expected_size() - writer.bytes_written();
        let want = usize::try_from(remaining).map_or(buffer.len(), |r| r.min(buffer.len()));

        let n = reader
            .read(&mut buffer[..want])
            .await
            .map_err(Error::from_read)?;
        if n == 0 {
            return Err(Error::TransportClosed);
        }

        writer.write(&buffer[..n]).await?;
        progress.advance(n as u64);
        on_progress(progress);
    }

    Ok(())
}

/// Write a complete stream folder transfer: header, then every entry of
/// `manifest` followed by its bytes.
///
/// `progress` should be created with `manifest.total_size` so that it
/// climbs monotonically across the whole folder.
pub async fn send_folder<W>(
    writer: &mut W,
    manifest: &FolderManifest,
    chunk_size: usize,
    progress: &mut TransferProgress,
    on_progress: &mut (dyn FnMut(&TransferProgress) + Send),
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let file_count = u32::try_from(manifest.len())
        .map_err(|_| Error::FramingError(format!("too many files: {}", manifest.len())))?;
    protocol::write_frame(
        writer,
        &Frame::Folder {
            name: manifest.name.clone(),
            file_count,
        },
    )
    .await?;

    if manifest.is_empty() {
        on_progress(progress);
        return Ok(());
    }

    for entry in &manifest.entries {
        protocol::write_folder_entry(writer, &entry.relative_path, entry.size).await?;
        send_file(writer, &entry.path, entry.size, chunk_size, progress, on_progress).await?;
    }
    writer.flush().await.map_err(Error::from_read)?;

    Ok(())
}

/// Receive the `file_count` entries of a stream folder transfer under
/// `root`.
///
/// Each file gets its own progress snapshot since the aggregate size is not
/// on the wire. `on_item` runs as soon as each file is complete, so files
/// that arrived before a failure are still reported.
pub async fn receive_folder<R>(
    reader: &mut R,
    root: &Path,
    file_count: u32,
    session_id: Uuid,
    on_progress: &mut (dyn FnMut(&TransferProgress) + Send),
    on_item: &mut (dyn FnMut(&ReceivedItem) + Send),
) -> Result<Vec<ReceivedItem>>
where
    R: AsyncRead + Unpin,
{
    let mut received = Vec::new();

    for _ in 0..file_count {
        let (relative_path, size) = protocol::read_folder_entry(reader).await?;
        let dest = resolver::resolve(root, &relative_path).await?;

        let mut progress =
            TransferProgress::new(session_id, &relative_path, TransferDirection::Receive, size);
        let sha256 = receive_file(reader, &dest, size, &mut progress, on_progress).await?;

        tracing::debug!("Received {} into {}", relative_path, dest.display());
        let item = ReceivedItem {
            name: relative_path,
            path: dest,
            size,
            sha256,
        };
        on_item(&item);
        received.push(item);
    }

    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use tempfile::TempDir;

    fn noop() -> impl FnMut(&TransferProgress) + Send {
        |_: &TransferProgress| {}
    }

    #[test]
    fn test_transfer_progress() {
        let mut progress =
            TransferProgress::new(Uuid::new_v4(), "a.bin", TransferDirection::Send, 200);
        assert!((progress.percentage() - 0.0).abs() < f64::EPSILON);

        progress.advance(50);
        assert!((progress.fraction() - 0.25).abs() < f64::EPSILON);

        progress.advance(500);
        assert_eq!(progress.bytes_transferred, 200);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_empty_progress_is_complete() {
        let progress =
            TransferProgress::new(Uuid::new_v4(), "empty", TransferDirection::Receive, 0);
        assert!((progress.fraction() - 1.0).abs() < f64::EPSILON);
        assert!((progress.percentage() - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_event_sink() {
        let (sink, mut rx) = EventSink::channel();
        sink.error(&Error::NotConnected);
        sink.emit(TransferEvent::Acknowledged {
            message: "text received".into(),
        });

        match rx.recv().await.unwrap() {
            TransferEvent::Error { kind, .. } => assert_eq!(kind, ErrorKind::NotConnected),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            rx.recv().await.unwrap(),
            TransferEvent::Acknowledged { .. }
        ));

        EventSink::disabled().emit(TransferEvent::Acknowledged {
            message: String::new(),
        });
    }

    async fn roundtrip(size: usize) {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source.bin");
        let content: Vec<u8> = (0..size).map(|i| (i * 7 % 256) as u8).collect();
        std::fs::write(&source, &content).unwrap();

        let (mut client, mut server) = tokio::io::duplex(4096);
        let dest = temp_dir.path().join("dest.bin");
        let session = Uuid::new_v4();

        let send = async {
            let mut progress =
                TransferProgress::new(session, "source.bin", TransferDirection::Send, size as u64);
            let mut reports = Vec::new();
            let mut record = |p: &TransferProgress| reports.push(p.bytes_transferred);
            send_file(&mut client, &source, size as u64, 1000, &mut progress, &mut record)
                .await
                .unwrap();
            reports
        };
        let receive = async {
            let mut progress =
                TransferProgress::new(session, "source.bin", TransferDirection::Receive, size as u64);
            receive_file(&mut server, &dest, size as u64, &mut progress, &mut noop())
                .await
                .unwrap()
        };

        let (reports, digest) = tokio::join!(send, receive);

        assert_eq!(std::fs::read(&dest).unwrap(), content);
        let expected: [u8; 32] = Sha256::digest(&content).into();
        assert_eq!(digest, expected);

        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(reports.last().copied(), Some(size as u64));
        if size == 0 {
            assert_eq!(reports.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_send_receive_sizes() {
        for size in [0, 1, 999, 1000, 1001, 65_536, 100_003] {
            roundtrip(size).await;
        }
    }

    #[tokio::test]
    async fn test_receive_truncated_stream() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("partial.bin");

        let mut reader = std::io::Cursor::new(vec![1u8; 10]);
        let mut progress =
            TransferProgress::new(Uuid::new_v4(), "partial.bin", TransferDirection::Receive, 100);
        let err = receive_file(&mut reader, &dest, 100, &mut progress, &mut noop())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TransportClosed));
        assert!(!dest.exists(), "partial file should be removed");
    }

    #[tokio::test]
    async fn test_receive_stops_at_expected_size() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("exact.bin");

        let mut data = vec![9u8; 5];
        data.extend_from_slice(b"trailer");
        let mut reader = std::io::Cursor::new(data);
        let mut progress =
            TransferProgress::new(Uuid::new_v4(), "exact.bin", TransferDirection::Receive, 5);
        receive_file(&mut reader, &dest, 5, &mut progress, &mut noop())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), vec![9u8; 5]);
        assert_eq!(reader.position(), 5);
    }

    #[tokio::test]
    async fn test_send_missing_source() {
        let temp_dir = TempDir::new().unwrap();
        let mut sink = Vec::new();
        let mut progress =
            TransferProgress::new(Uuid::new_v4(), "gone", TransferDirection::Send, 10);
        let err = send_file(
            &mut sink,
            &temp_dir.path().join("gone"),
            10,
            8192,
            &mut progress,
            &mut noop(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_folder_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("album");
        std::fs::create_dir_all(root.join("2024").join("june")).unwrap();
        std::fs::write(root.join("cover.jpg"), vec![1u8; 3000]).unwrap();
        std::fs::write(root.join("2024").join("june").join("a.raw"), vec![2u8; 5000]).unwrap();
        std::fs::write(root.join("2024").join("empty.txt"), b"").unwrap();

        let manifest = FolderManifest::scan(&root).unwrap();
        let mut wire = Vec::new();
        let mut progress = TransferProgress::new(
            Uuid::new_v4(),
            "album",
            TransferDirection::Send,
            manifest.total_size,
        );
        let mut fractions = Vec::new();
        let mut record = |p: &TransferProgress| fractions.push(p.fraction());
        send_folder(&mut wire, &manifest, 1024, &mut progress, &mut record)
            .await
            .unwrap();

        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        assert!((fractions.last().copied().unwrap() - 1.0).abs() < f64::EPSILON);

        let save_dir = temp_dir.path().join("save");
        let mut reader = std::io::Cursor::new(wire);
        let Some(Frame::Folder { name, file_count }) =
            protocol::read_frame(&mut reader).await.unwrap()
        else {
            panic!("expected folder header");
        };
        assert_eq!(name, "album");
        assert_eq!(file_count, 3);

        let dest_root = resolver::folder_root(&save_dir, &name).await.unwrap();
        let mut reported = 0;
        let mut count = |_: &ReceivedItem| reported += 1;
        let items = receive_folder(
            &mut reader,
            &dest_root,
            file_count,
            Uuid::new_v4(),
            &mut noop(),
            &mut count,
        )
        .await
        .unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(reported, 3);
        assert_eq!(
            std::fs::read(save_dir.join("album").join("2024").join("june").join("a.raw")).unwrap(),
            vec![2u8; 5000]
        );
        assert!(save_dir.join("album").join("2024").join("empty.txt").exists());
        assert_eq!(
            std::fs::read(save_dir.join("album").join("cover.jpg")).unwrap().len(),
            3000
        );
    }

    #[tokio::test]
    async fn test_empty_folder() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("nothing");
        std::fs::create_dir(&root).unwrap();

        let manifest = FolderManifest::scan(&root).unwrap();
        let mut wire = Vec::new();
        let mut progress =
            TransferProgress::new(Uuid::new_v4(), "nothing", TransferDirection::Send, 0);
        let mut reports = 0;
        let mut count = |_: &TransferProgress| reports += 1;
        send_folder(&mut wire, &manifest, 1024, &mut progress, &mut count)
            .await
            .unwrap();

        assert_eq!(reports, 1);
        let mut reader = std::io::Cursor::new(wire);
        assert_eq!(
            protocol::read_frame(&mut reader).await.unwrap(),
            Some(Frame::Folder {
                name: "nothing".into(),
                file_count: 0
            })
        );
    }

    #[tokio::test]
    async fn test_folder_reports_items_before_failure() {
        let temp_dir = TempDir::new().unwrap();
        let mut wire = Vec::new();
        protocol::write_folder_entry(&mut wire, "first.txt", 5).await.unwrap();
        wire.extend_from_slice(b"hello");
        protocol::write_folder_entry(&mut wire, "second.txt", 100).await.unwrap();
        wire.extend_from_slice(b"cut short");

        let root = temp_dir.path().join("batch");
        let mut names = Vec::new();
        let mut record = |item: &ReceivedItem| names.push(item.name.clone());
        let mut reader = std::io::Cursor::new(wire);
        let err = receive_folder(&mut reader, &root, 2, Uuid::new_v4(), &mut noop(), &mut record)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TransportClosed));
        assert_eq!(names, vec!["first.txt".to_string()]);
        assert_eq!(std::fs::read(root.join("first.txt")).unwrap(), b"hello");
        assert!(!root.join("second.txt").exists());
    }
}
