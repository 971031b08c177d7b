//! End-to-end tests for the datagram (UDP) transport over loopback.
//!
//! Payloads are kept small so that loopback delivery is effectively
//! lossless.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use avasend_core::clipboard::{self, MemoryClipboard};
use avasend_core::config::TransportKind;
use avasend_core::session::{Client, Server};
use avasend_core::transfer::{EventSink, TransferEvent};

use common::{
    assert_files_equal, create_temp_dir, create_test_directory, create_test_file, init_logging,
    random_bytes, test_config, wait_for_event,
};

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

#[tokio::test]
async fn test_text_and_clipboard() {
    init_logging();
    let temp = create_temp_dir();
    let config = test_config(temp.path());
    let target = clipboard::shared(MemoryClipboard::default());

    let (events, mut rx) = EventSink::channel();
    let server = Server::start_with_clipboard(
        &config,
        loopback(),
        TransportKind::Udp,
        &config.general.save_folder,
        events,
        std::sync::Arc::clone(&target),
    )
    .await
    .unwrap();

    let client = Client::connect(
        &config,
        server.local_addr(),
        TransportKind::Udp,
        EventSink::disabled(),
    )
    .await
    .unwrap();

    assert_eq!(client.send_text("hello").await.unwrap(), None);
    let event = wait_for_event(&mut rx, |e| matches!(e, TransferEvent::TextReceived { .. })).await;
    if let TransferEvent::TextReceived { text, .. } = event {
        assert_eq!(text, "hello");
    }

    client.send_clipboard("shared line").await.unwrap();
    wait_for_event(&mut rx, |e| {
        matches!(e, TransferEvent::ClipboardReceived { .. })
    })
    .await;
    assert_eq!(clipboard::read_shared(&target).unwrap(), "shared line");

    server.stop().await;
}

#[tokio::test]
async fn test_small_files_arrive_intact() {
    init_logging();
    let temp = create_temp_dir();
    let mut config = test_config(temp.path());
    config.network.datagram_pacing = Duration::from_millis(1);

    let (events, mut rx) = EventSink::channel();
    let server = Server::start(
        &config,
        loopback(),
        TransportKind::Udp,
        &config.general.save_folder,
        events,
    )
    .await
    .unwrap();
    let client = Client::connect(
        &config,
        server.local_addr(),
        TransportKind::Udp,
        EventSink::disabled(),
    )
    .await
    .unwrap();

    let empty = create_test_file(temp.path(), "empty.txt", b"");
    let small = create_test_file(temp.path(), "small.bin", &random_bytes(50_000));

    for source in [&empty, &small] {
        client.send_file(source).await.unwrap();
        let event = wait_for_event(&mut rx, |e| {
            matches!(e, TransferEvent::ItemReceived { .. } | TransferEvent::Error { .. })
        })
        .await;
        match event {
            TransferEvent::ItemReceived { path, .. } => assert_files_equal(source, &path),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    server.stop().await;
}

#[tokio::test]
async fn test_folder_structure_preserved() {
    init_logging();
    let temp = create_temp_dir();
    let mut config = test_config(temp.path());
    config.network.datagram_pacing = Duration::from_millis(1);
    let source = create_test_directory(temp.path(), "project");

    let (events, mut rx) = EventSink::channel();
    let server = Server::start(
        &config,
        loopback(),
        TransportKind::Udp,
        &config.general.save_folder,
        events,
    )
    .await
    .unwrap();
    let client = Client::connect(
        &config,
        server.local_addr(),
        TransportKind::Udp,
        EventSink::disabled(),
    )
    .await
    .unwrap();

    client.send_folder(&source).await.unwrap();

    let mut received = 0;
    while received < 4 {
        match wait_for_event(&mut rx, |e| {
            matches!(e, TransferEvent::ItemReceived { .. } | TransferEvent::Error { .. })
        })
        .await
        {
            TransferEvent::ItemReceived { .. } => received += 1,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    let root = config.general.save_folder.join("project");
    for relative in [
        "file1.txt",
        "file2.txt",
        "subdir/nested.txt",
        "subdir/deeper/leaf.bin",
    ] {
        assert_files_equal(&source.join(relative), &root.join(relative));
    }

    server.stop().await;
}
