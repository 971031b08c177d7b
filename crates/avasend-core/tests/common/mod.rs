//! Common test utilities for `AvaSend` integration tests.
//!
//! This module provides shared functionality for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};

use avasend_core::config::Config;
use avasend_core::transfer::TransferEvent;

/// Install a test subscriber once; `RUST_LOG` controls the output.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 of the file at `path`.
pub fn sha256_file(path: &Path) -> [u8; 32] {
    sha256(&std::fs::read(path).expect("Failed to read file"))
}

/// Assert that two files have identical content.
pub fn assert_files_equal(path1: &Path, path2: &Path) {
    let content1 = std::fs::read(path1).expect("Failed to read first file");
    let content2 = std::fs::read(path2).expect("Failed to read second file");
    assert_eq!(content1, content2, "File contents differ");
}

/// Create a test directory structure with multiple files.
pub fn create_test_directory(base: &Path, name: &str) -> PathBuf {
    let dir = base.join(name);
    std::fs::create_dir_all(&dir).expect("Failed to create test directory");

    create_test_file(&dir, "file1.txt", b"Hello, AvaSend!");
    create_test_file(&dir, "file2.txt", b"Second test file content");
    create_test_file(&dir, "subdir/nested.txt", b"Nested file in subdirectory");
    create_test_file(&dir, "subdir/deeper/leaf.bin", &random_bytes(20_000));

    dir
}

/// Config with a save folder under `dir` and short retry timings.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.general.save_folder = dir.join("received");
    config.network.connect_timeout = Duration::from_millis(500);
    config.network.retry_delay = Duration::from_millis(300);
    config
}

/// Wait up to five seconds for an event matching `pred`.
pub async fn wait_for_event<F>(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<TransferEvent>,
    mut pred: F,
) -> TransferEvent
where
    F: FnMut(&TransferEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("Timed out waiting for event")
}
