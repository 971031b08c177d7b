//! # AvaSend Core Library
//!
//! `avasend-core` moves text, files, folders and clipboard content between
//! two machines on a local network.
//!
//! ## Features
//!
//! - **Two transports**: acknowledged TCP streams or fire-and-forget UDP
//!   datagrams, selected per client or server
//! - **Safe storage**: received names never overwrite existing files or
//!   escape the save folder
//! - **Progress events**: every transfer reports through an event channel
//! - **Reconnect policy**: bounded connect retries with a supervisor that
//!   reconnects after each acknowledged item
//!
//! ## Modules
//!
//! - [`clipboard`] - Clipboard access seam
//! - [`config`] - Configuration management
//! - [`datagram`] - UDP client and server
//! - [`error`] - Error taxonomy
//! - [`mod@file`] - Chunked reading, writing and path resolution
//! - [`protocol`] - Frame codec for both transports
//! - [`session`] - Transport-independent client and server
//! - [`stream`] - TCP client and server
//! - [`transfer`] - Transfer engine, progress and events
//!
//! ## Example
//!
//! ```rust,ignore
//! use avasend_core::config::{Config, TransportKind};
//! use avasend_core::session::{Client, Server};
//! use avasend_core::transfer::EventSink;
//!
//! let config = Config::load()?;
//! let (events, mut rx) = EventSink::channel();
//! let server = Server::start(
//!     &config,
//!     "0.0.0.0:8080".parse()?,
//!     TransportKind::Tcp,
//!     &config.general.save_folder,
//!     events,
//! )
//! .await?;
//!
//! // On the other machine
//! let client = Client::connect(&config, peer, TransportKind::Tcp, EventSink::disabled()).await?;
//! client.send_text("hello").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod clipboard;
pub mod config;
pub mod datagram;
pub mod error;
pub mod file;
pub mod protocol;
pub mod session;
pub mod stream;
pub mod transfer;

pub use error::{Error, ErrorKind, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default stream (TCP) port
pub const DEFAULT_TCP_PORT: u16 = 8080;

/// Default datagram (UDP) port
pub const DEFAULT_UDP_PORT: u16 = 8081;

/// Default chunk size for file transfers (8 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 8192;
