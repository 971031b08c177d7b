//! File operations for AvaSend.
//!
//! This module handles:
//! - Folder enumeration with aggregate size
//! - Streaming a source file in fixed-size chunks
//! - Writing received bytes with a running SHA-256
//! - Destination path resolution (see [`resolver`])
//!
//! Sources are never buffered whole; at most one chunk is held in memory.

pub mod resolver;

use std::path::{Path, PathBuf};

use sha2::Digest;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};

/// One regular file inside a folder being sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderEntry {
    /// Path relative to the folder root, `/`-separated
    pub relative_path: String,
    /// Absolute path on the local disk
    pub path: PathBuf,
    /// Size at enumeration time
    pub size: u64,
}

/// Every regular file under a folder, enumerated up front.
#[derive(Debug, Clone)]
pub struct FolderManifest {
    /// Name of the folder itself
    pub name: String,
    /// Files in a stable order
    pub entries: Vec<FolderEntry>,
    /// Sum of all entry sizes
    pub total_size: u64,
}

impl FolderManifest {
    /// Walk `root` recursively and record every regular file.
    ///
    /// # Errors
    ///
    /// Returns `SourceUnavailable` if `root` is not a readable directory.
    pub fn scan(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(source_error(root, "not a directory"));
        }
        let name = file_name_of(root)?;

        let mut entries = Vec::new();
        for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| source_error(root, &e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| source_error(entry.path(), &e.to_string()))?;
            let relative_path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let size = entry
                .metadata()
                .map_err(|e| source_error(entry.path(), &e.to_string()))?
                .len();

            entries.push(FolderEntry {
                relative_path,
                path: entry.path().to_path_buf(),
                size,
            });
        }

        let total_size = entries.iter().map(|e| e.size).sum();
        Ok(Self {
            name,
            entries,
            total_size,
        })
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the folder holds no files.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reads a source file sequentially, one chunk at a time.
#[derive(Debug)]
pub struct FileChunker {
    path: PathBuf,
    file: tokio::fs::File,
    size: u64,
    remaining: u64,
    buffer: Vec<u8>,
}

impl FileChunker {
    /// Open `path` and read it up to its current size.
    ///
    /// # Errors
    ///
    /// Returns `SourceUnavailable` if the file cannot be opened.
    pub async fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        let file = open_source(path).await?;
        let size = file
            .metadata()
            .await
            .map_err(|e| source_error(path, &e.to_string()))?
            .len();
        Ok(Self::with_file(path, file, chunk_size, size))
    }

    /// Open `path` and read exactly `size` bytes from it.
    ///
    /// A file that grew since `size` was taken is cut at `size`; one that
    /// shrank fails in [`next_chunk`](Self::next_chunk).
    pub async fn open_sized(path: &Path, chunk_size: usize, size: u64) -> Result<Self> {
        let file = open_source(path).await?;
        Ok(Self::with_file(path, file, chunk_size, size))
    }

    fn with_file(path: &Path, file: tokio::fs::File, chunk_size: usize, size: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            file,
            size,
            remaining: size,
            buffer: vec![0u8; chunk_size.max(1)],
        }
    }

    /// Total bytes this chunker will yield.
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Read the next chunk, or `None` once `size` bytes were produced.
    ///
    /// # Errors
    ///
    /// Returns `SourceUnavailable` if the file ends early or cannot be read.
    pub async fn next_chunk(&mut self) -> Result<Option<&[u8]>> {
        if self.remaining == 0 {
            return Ok(None);
        }

        let want = usize::try_from(self.remaining)
            .map_or(self.buffer.len(), |r| r.min(self.buffer.len()));
        let buf = &mut self.buffer[..want];
        self.file.read_exact(buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                source_error(&self.path, "file shrank during transfer")
            } else {
                source_error(&self.path, &e.to_string())
            }
        })?;

        self.remaining -= want as u64;
        Ok(Some(&self.buffer[..want]))
    }
}

/// Writer for received file bytes.
#[derive(Debug)]
pub struct FileWriter {
    /// Output file path
    pub output_path: PathBuf,
    /// Expected total file size
    pub expected_size: u64,
    file: Option<tokio::fs::File>,
    /// Bytes written so far
    pub bytes_written: u64,
    sha256_hasher: sha2::Sha256,
}

impl FileWriter {
    /// Create the output file. `output_path` should come from
    /// [`resolver::resolve`] so that no existing file is replaced.
    ///
    /// # Errors
    ///
    /// Returns `DestinationError` if the file cannot be created.
    pub async fn create(output_path: PathBuf, expected_size: u64) -> Result<Self> {
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| destination_error(parent, &e))?;
        }

        let file = tokio::fs::File::create(&output_path)
            .await
            .map_err(|e| destination_error(&output_path, &e))?;

        Ok(Self {
            output_path,
            expected_size,
            file: Some(file),
            bytes_written: 0,
            sha256_hasher: sha2::Sha256::new(),
        })
    }

    /// Append bytes to the file.
    ///
    /// # Errors
    ///
    /// Returns `FramingError` if the data would exceed the expected size and
    /// `DestinationError` if the write fails.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let new_total = self.bytes_written + data.len() as u64;
        if new_total > self.expected_size {
            return Err(Error::FramingError(format!(
                "received {new_total} bytes for '{}', expected {}",
                self.output_path.display(),
                self.expected_size
            )));
        }

        if let Some(ref mut file) = self.file {
            file.write_all(data)
                .await
                .map_err(|e| destination_error(&self.output_path, &e))?;
        }

        self.sha256_hasher.update(data);
        self.bytes_written = new_total;
        Ok(())
    }

    /// Flush the file and return the SHA-256 of everything written.
    ///
    /// # Errors
    ///
    /// Returns `DestinationError` if the file cannot be synced.
    pub async fn finalize(mut self) -> Result<[u8; 32]> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| destination_error(&self.output_path, &e))?;
            file.sync_all()
                .await
                .map_err(|e| destination_error(&self.output_path, &e))?;
        }

        Ok(std::mem::take(&mut self.sha256_hasher).finalize().into())
    }

    /// Close and delete the partially written file.
    ///
    /// Dropping an unfinalized writer does the same.
    pub fn discard(self) {
        drop(self);
    }

    /// Get the current bytes written count.
    #[must_use]
    pub const fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Get the expected file size.
    #[must_use]
    pub const fn expected_size(&self) -> u64 {
        self.expected_size
    }

    /// Check if writing is complete.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.bytes_written >= self.expected_size
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            drop(file);
            if let Err(e) = std::fs::remove_file(&self.output_path) {
                tracing::debug!(
                    "Could not remove partial file {}: {}",
                    self.output_path.display(),
                    e
                );
            } else {
                tracing::debug!("Removed partial file {}", self.output_path.display());
            }
        }
    }
}

/// Final path component of `path` as a string.
///
/// # Errors
///
/// Returns `InvalidPath` if `path` has no file name (e.g. `/` or `..`).
pub fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidPath(path.display().to_string()))
}

/// Format a file size for display.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

async fn open_source(path: &Path) -> Result<tokio::fs::File> {
    tokio::fs::File::open(path)
        .await
        .map_err(|e| source_error(path, &e.to_string()))
}

fn source_error(path: &Path, reason: &str) -> Error {
    Error::SourceUnavailable {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

fn destination_error(path: &Path, err: &std::io::Error) -> Error {
    Error::DestinationError {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(20 * 1024 * 1024), "20.0 MB");
    }

    #[tokio::test]
    async fn test_chunk_empty_file() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let file_path = temp_dir.path().join("empty.txt");
        std::fs::write(&file_path, b"").expect("write empty file");

        let mut chunker = FileChunker::open(&file_path, 8192).await.unwrap();
        assert_eq!(chunker.size(), 0);
        assert!(chunker.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chunk_sizes() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("data.bin");
        let content: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&file_path, &content).unwrap();

        let mut chunker = FileChunker::open(&file_path, 8192).await.unwrap();
        let mut lengths = Vec::new();
        let mut collected = Vec::new();
        while let Some(chunk) = chunker.next_chunk().await.unwrap() {
            lengths.push(chunk.len());
            collected.extend_from_slice(chunk);
        }

        assert_eq!(lengths, vec![8192, 8192, 3616]);
        assert_eq!(collected, content);
    }

    #[tokio::test]
    async fn test_chunker_missing_source() {
        let temp_dir = TempDir::new().unwrap();
        let err = FileChunker::open(&temp_dir.path().join("nope"), 8192)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_chunker_shrunk_source() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("shrinks.bin");
        std::fs::write(&file_path, vec![1u8; 100]).unwrap();

        let mut chunker = FileChunker::open_sized(&file_path, 64, 200).await.unwrap();
        assert_eq!(chunker.next_chunk().await.unwrap().map(<[u8]>::len), Some(64));
        let err = chunker.next_chunk().await.unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_chunker_grown_source_is_cut() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("grows.bin");
        std::fs::write(&file_path, vec![7u8; 300]).unwrap();

        let mut chunker = FileChunker::open_sized(&file_path, 64, 100).await.unwrap();
        let mut total = 0;
        while let Some(chunk) = chunker.next_chunk().await.unwrap() {
            total += chunk.len();
        }
        assert_eq!(total, 100);
    }

    #[tokio::test]
    async fn test_file_writer_empty_file() {
        let temp_dir = TempDir::new().expect("create temp dir");
        let output_path = temp_dir.path().join("empty_output.txt");

        let writer = FileWriter::create(output_path.clone(), 0).await.unwrap();
        assert!(writer.is_complete());
        let sha256 = writer.finalize().await.unwrap();

        assert!(output_path.exists());
        assert!(std::fs::read(&output_path).unwrap().is_empty());
        let expected: [u8; 32] = sha2::Sha256::digest(b"").into();
        assert_eq!(sha256, expected);
    }

    #[tokio::test]
    async fn test_file_writer_basic() {
        let temp_dir = TempDir::new().unwrap();
        let output_path = temp_dir.path().join("sub").join("out.txt");

        let mut writer = FileWriter::create(output_path.clone(), 11).await.unwrap();
        writer.write(b"hello ").await.unwrap();
        writer.write(b"world").await.unwrap();
        assert_eq!(writer.bytes_written(), 11);
        let sha256 = writer.finalize().await.unwrap();

        assert_eq!(std::fs::read(&output_path).unwrap(), b"hello world");
        let expected: [u8; 32] = sha2::Sha256::digest(b"hello world").into();
        assert_eq!(sha256, expected);
    }

    #[tokio::test]
    async fn test_file_writer_rejects_overflow() {
        let temp_dir = TempDir::new().unwrap();
        let mut writer = FileWriter::create(temp_dir.path().join("x"), 3)
            .await
            .unwrap();
        let err = writer.write(b"toolong").await.unwrap_err();
        assert!(matches!(err, Error::FramingError(_)));
    }

    #[tokio::test]
    async fn test_file_writer_discard() {
        let temp_dir = TempDir::new().unwrap();
        let output_path = temp_dir.path().join("partial.bin");
        let mut writer = FileWriter::create(output_path.clone(), 10).await.unwrap();
        writer.write(b"abc").await.unwrap();
        writer.discard();
        assert!(!output_path.exists());

        let dropped = temp_dir.path().join("dropped.bin");
        let writer = FileWriter::create(dropped.clone(), 10).await.unwrap();
        drop(writer);
        assert!(!dropped.exists());
    }

    #[test]
    fn test_folder_manifest_scan() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("docs");
        std::fs::create_dir_all(root.join("nested").join("deeper")).unwrap();
        std::fs::create_dir_all(root.join("empty")).unwrap();
        std::fs::write(root.join("a.txt"), b"aaaa").unwrap();
        std::fs::write(root.join("nested").join("b.txt"), b"bb").unwrap();
        std::fs::write(root.join("nested").join("deeper").join("c.bin"), b"c").unwrap();

        let manifest = FolderManifest::scan(&root).unwrap();
        assert_eq!(manifest.name, "docs");
        assert_eq!(manifest.len(), 3);
        assert_eq!(manifest.total_size, 7);

        let paths: Vec<_> = manifest
            .entries
            .iter()
            .map(|e| e.relative_path.as_str())
            .collect();
        assert_eq!(paths, vec!["a.txt", "nested/b.txt", "nested/deeper/c.bin"]);
    }

    #[test]
    fn test_folder_manifest_empty_and_missing() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("empty");
        std::fs::create_dir(&root).unwrap();

        let manifest = FolderManifest::scan(&root).unwrap();
        assert!(manifest.is_empty());
        assert_eq!(manifest.total_size, 0);

        let err = FolderManifest::scan(&temp_dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { .. }));
    }
}
