//! AvaSend wire protocol.
//!
//! The same set of frames travels over two bindings.
//!
//! ## Stream binding (TCP)
//!
//! Every connection carries exactly one item introduced by a single ASCII tag
//! byte. All integers are little-endian.
//!
//! ```text
//! 'T' [i32 len][utf8 text]
//! 'C' [i32 len][utf8 clipboard text]
//! 'F' [i32 len][utf8 name][i64 size] <size raw bytes>
//! 'D' [i32 len][utf8 name][i32 count]
//!     count x ([i32 len][utf8 relative path][i64 size] <size raw bytes>)
//! ```
//!
//! After a complete item the server answers with `[i32 len][utf8 message]`.
//! Relative paths use `/` on the wire.
//!
//! ## Datagram binding (UDP)
//!
//! One frame per datagram, `[tag][payload]`:
//!
//! | Tag | Frame | Payload |
//! |-----|-------|---------|
//! | `T` | Text | utf8 text |
//! | `B` | Clipboard | utf8 text |
//! | `D` | Folder | `[u32 count][utf8 name]` |
//! | `P` | PathHint | utf8 relative path |
//! | `F` | File | `[u64 size][utf8 name]` |
//! | `C` | ChunkData | raw bytes |
//! | `E` | EndOfItem | empty |

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};

/// Largest length-prefixed field accepted from the wire (16 MiB).
pub const MAX_FIELD_LEN: usize = 16 * 1024 * 1024;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Largest chunk that fits in one datagram next to its tag.
pub const MAX_DATAGRAM_CHUNK: usize = MAX_DATAGRAM_SIZE - 1;

/// Kinds of frames in the AvaSend protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Plain text message
    Text,
    /// Single file header
    File,
    /// Folder header
    Folder,
    /// Clipboard text
    Clipboard,
    /// Relative path of the next file in a folder (datagram only)
    PathHint,
    /// Raw file bytes (datagram only)
    ChunkData,
    /// End of file or folder (datagram only)
    EndOfItem,
}

impl FrameKind {
    /// Tag byte used on the stream binding, if the kind exists there.
    pub const fn stream_tag(self) -> Option<u8> {
        match self {
            Self::Text => Some(b'T'),
            Self::File => Some(b'F'),
            Self::Folder => Some(b'D'),
            Self::Clipboard => Some(b'C'),
            Self::PathHint | Self::ChunkData | Self::EndOfItem => None,
        }
    }

    /// Parse a stream tag byte.
    pub const fn from_stream_tag(byte: u8) -> Option<Self> {
        match byte {
            b'T' => Some(Self::Text),
            b'F' => Some(Self::File),
            b'D' => Some(Self::Folder),
            b'C' => Some(Self::Clipboard),
            _ => None,
        }
    }

    /// Tag byte used on the datagram binding.
    pub const fn datagram_tag(self) -> u8 {
        match self {
            Self::Text => b'T',
            Self::Clipboard => b'B',
            Self::Folder => b'D',
            Self::PathHint => b'P',
            Self::File => b'F',
            Self::ChunkData => b'C',
            Self::EndOfItem => b'E',
        }
    }

    /// Parse a datagram tag byte.
    pub const fn from_datagram_tag(byte: u8) -> Option<Self> {
        match byte {
            b'T' => Some(Self::Text),
            b'B' => Some(Self::Clipboard),
            b'D' => Some(Self::Folder),
            b'P' => Some(Self::PathHint),
            b'F' => Some(Self::File),
            b'C' => Some(Self::ChunkData),
            b'E' => Some(Self::EndOfItem),
            _ => None,
        }
    }
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Plain text message
    Text(String),
    /// Clipboard text
    Clipboard(String),
    /// Header of a single file of `size` bytes
    File {
        /// File name
        name: String,
        /// Exact number of bytes that follow
        size: u64,
    },
    /// Header of a folder holding `file_count` files
    Folder {
        /// Folder name
        name: String,
        /// Number of files in the folder
        file_count: u32,
    },
    /// Relative path of the next file inside a folder
    PathHint(String),
    /// Raw file bytes
    ChunkData(Vec<u8>),
    /// End of the current file, or of the folder when no file is open
    EndOfItem,
}

impl Frame {
    /// The kind of this frame.
    pub const fn kind(&self) -> FrameKind {
        match self {
            Self::Text(_) => FrameKind::Text,
            Self::Clipboard(_) => FrameKind::Clipboard,
            Self::File { .. } => FrameKind::File,
            Self::Folder { .. } => FrameKind::Folder,
            Self::PathHint(_) => FrameKind::PathHint,
            Self::ChunkData(_) => FrameKind::ChunkData,
            Self::EndOfItem => FrameKind::EndOfItem,
        }
    }
}

/// Write a stream item header (`Text`, `Clipboard`, `File` or `Folder`).
///
/// For `File` the caller follows up with exactly `size` raw bytes; for
/// `Folder` with `file_count` entries written by [`write_folder_entry`].
///
/// # Errors
///
/// Returns `FramingError` for frames that do not exist on the stream binding
/// or fields that exceed the wire limits.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let tag = frame
        .kind()
        .stream_tag()
        .ok_or_else(|| not_on_stream(frame.kind()))?;

    let mut buf = vec![tag];
    match frame {
        Frame::Text(text) | Frame::Clipboard(text) => put_string(&mut buf, text)?,
        Frame::File { name, size } => {
            put_string(&mut buf, name)?;
            put_size(&mut buf, *size)?;
        }
        Frame::Folder { name, file_count } => {
            put_string(&mut buf, name)?;
            let count = i32::try_from(*file_count)
                .map_err(|_| Error::FramingError(format!("too many files: {file_count}")))?;
            buf.extend_from_slice(&count.to_le_bytes());
        }
        Frame::PathHint(_) | Frame::ChunkData(_) | Frame::EndOfItem => {
            return Err(not_on_stream(frame.kind()));
        }
    }

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one stream item header.
///
/// Returns `Ok(None)` when the peer closes the connection before sending a
/// tag.
///
/// # Errors
///
/// `TransportClosed` when the stream ends inside a field, `FramingError` for
/// unknown tags and malformed fields.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>>
where
    R: AsyncReadExt + Unpin,
{
    let mut tag = [0u8; 1];
    let n = reader.read(&mut tag).await.map_err(Error::from_read)?;
    if n == 0 {
        return Ok(None);
    }

    let kind = FrameKind::from_stream_tag(tag[0])
        .ok_or_else(|| Error::FramingError(format!("unknown tag: {:#04x}", tag[0])))?;

    let frame = match kind {
        FrameKind::Text => Frame::Text(read_string(reader).await?),
        FrameKind::Clipboard => Frame::Clipboard(read_string(reader).await?),
        FrameKind::File => {
            let name = read_string(reader).await?;
            let size = read_size(reader).await?;
            Frame::File { name, size }
        }
        FrameKind::Folder => {
            let name = read_string(reader).await?;
            let count = read_i32(reader).await?;
            let file_count = u32::try_from(count)
                .map_err(|_| Error::FramingError(format!("negative file count: {count}")))?;
            Frame::Folder { name, file_count }
        }
        FrameKind::PathHint | FrameKind::ChunkData | FrameKind::EndOfItem => {
            return Err(not_on_stream(kind));
        }
    };

    Ok(Some(frame))
}

fn not_on_stream(kind: FrameKind) -> Error {
    Error::FramingError(format!("{kind:?} frame has no stream encoding"))
}

/// Write the header of one file inside a stream folder transfer.
pub async fn write_folder_entry<W>(writer: &mut W, relative_path: &str, size: u64) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let mut buf = Vec::with_capacity(relative_path.len() + 12);
    put_string(&mut buf, relative_path)?;
    put_size(&mut buf, size)?;
    writer.write_all(&buf).await?;
    Ok(())
}

/// Read the header of one file inside a stream folder transfer.
pub async fn read_folder_entry<R>(reader: &mut R) -> Result<(String, u64)>
where
    R: AsyncReadExt + Unpin,
{
    let path = read_string(reader).await?;
    let size = read_size(reader).await?;
    Ok((path, size))
}

/// Write an acknowledgment message.
pub async fn write_ack<W>(writer: &mut W, message: &str) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let mut buf = Vec::with_capacity(message.len() + 4);
    put_string(&mut buf, message)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read an acknowledgment message.
pub async fn read_ack<R>(reader: &mut R) -> Result<String>
where
    R: AsyncReadExt + Unpin,
{
    read_string(reader).await
}

/// Read a length-prefixed UTF-8 string.
///
/// # Errors
///
/// Returns `FramingError` if the length is negative, exceeds
/// [`MAX_FIELD_LEN`], or the bytes are not valid UTF-8.
pub async fn read_string<R>(reader: &mut R) -> Result<String>
where
    R: AsyncReadExt + Unpin,
{
    let len = read_i32(reader).await?;
    let len = usize::try_from(len)
        .map_err(|_| Error::FramingError(format!("negative field length: {len}")))?;
    if len > MAX_FIELD_LEN {
        return Err(Error::FramingError(format!(
            "field too large: {len} bytes"
        )));
    }

    let mut buf = vec![0u8; len];
    if len > 0 {
        reader.read_exact(&mut buf).await.map_err(Error::from_read)?;
    }

    String::from_utf8(buf).map_err(|e| Error::FramingError(format!("invalid utf-8: {e}")))
}

async fn read_i32<R>(reader: &mut R) -> Result<i32>
where
    R: AsyncReadExt + Unpin,
{
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).await.map_err(Error::from_read)?;
    Ok(i32::from_le_bytes(buf))
}

async fn read_size<R>(reader: &mut R) -> Result<u64>
where
    R: AsyncReadExt + Unpin,
{
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).await.map_err(Error::from_read)?;
    let size = i64::from_le_bytes(buf);
    u64::try_from(size).map_err(|_| Error::FramingError(format!("negative size: {size}")))
}

fn put_string(buf: &mut Vec<u8>, value: &str) -> Result<()> {
    if value.len() > MAX_FIELD_LEN {
        return Err(Error::FramingError(format!(
            "field too large: {} bytes",
            value.len()
        )));
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let len = value.len() as i32;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

fn put_size(buf: &mut Vec<u8>, size: u64) -> Result<()> {
    let size =
        i64::try_from(size).map_err(|_| Error::FramingError(format!("size too large: {size}")))?;
    buf.extend_from_slice(&size.to_le_bytes());
    Ok(())
}

/// Encode a frame as a single datagram payload.
///
/// # Errors
///
/// Returns `FramingError` if the encoded frame exceeds [`MAX_DATAGRAM_SIZE`].
pub fn encode_datagram(frame: &Frame) -> Result<Vec<u8>> {
    let mut buf = vec![frame.kind().datagram_tag()];
    match frame {
        Frame::Text(text) | Frame::Clipboard(text) | Frame::PathHint(text) => {
            buf.extend_from_slice(text.as_bytes());
        }
        Frame::Folder { name, file_count } => {
            buf.extend_from_slice(&file_count.to_le_bytes());
            buf.extend_from_slice(name.as_bytes());
        }
        Frame::File { name, size } => {
            buf.extend_from_slice(&size.to_le_bytes());
            buf.extend_from_slice(name.as_bytes());
        }
        Frame::ChunkData(data) => buf.extend_from_slice(data),
        Frame::EndOfItem => {}
    }

    if buf.len() > MAX_DATAGRAM_SIZE {
        return Err(Error::FramingError(format!(
            "{:?} frame of {} bytes does not fit in a datagram",
            frame.kind(),
            buf.len()
        )));
    }
    Ok(buf)
}

/// Decode one datagram payload.
///
/// # Errors
///
/// Returns `FramingError` for empty or truncated datagrams, unknown tags and
/// invalid UTF-8.
pub fn decode_datagram(data: &[u8]) -> Result<Frame> {
    let (&tag, payload) = data
        .split_first()
        .ok_or_else(|| Error::FramingError("empty datagram".to_string()))?;

    let kind = FrameKind::from_datagram_tag(tag)
        .ok_or_else(|| Error::FramingError(format!("unknown tag: {tag:#04x}")))?;

    let frame = match kind {
        FrameKind::Text => Frame::Text(utf8(payload)?),
        FrameKind::Clipboard => Frame::Clipboard(utf8(payload)?),
        FrameKind::PathHint => Frame::PathHint(utf8(payload)?),
        FrameKind::Folder => {
            let (count, name) = split_prefix::<4>(payload, "folder")?;
            Frame::Folder {
                name: utf8(name)?,
                file_count: u32::from_le_bytes(count),
            }
        }
        FrameKind::File => {
            let (size, name) = split_prefix::<8>(payload, "file")?;
            Frame::File {
                name: utf8(name)?,
                size: u64::from_le_bytes(size),
            }
        }
        FrameKind::ChunkData => Frame::ChunkData(payload.to_vec()),
        FrameKind::EndOfItem => Frame::EndOfItem,
    };

    Ok(frame)
}

fn split_prefix<'a, const N: usize>(payload: &'a [u8], what: &str) -> Result<([u8; N], &'a [u8])> {
    if payload.len() < N {
        return Err(Error::FramingError(format!(
            "truncated {what} header: {} bytes",
            payload.len()
        )));
    }
    let (head, rest) = payload.split_at(N);
    let mut prefix = [0u8; N];
    prefix.copy_from_slice(head);
    Ok((prefix, rest))
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::FramingError(format!("invalid utf-8: {e}")))
}
