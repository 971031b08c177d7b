//! Stream (TCP) transport.
//!
//! One item per connection: the client writes a tagged item, the server
//! stores it, answers with a short acknowledgment and closes the
//! connection. The client keeps a supervisor task that notices the close and
//! reconnects, so the next item finds a fresh connection.

pub mod client;
pub mod server;

use std::time::Duration;

use crate::clipboard::SharedClipboard;
use crate::config::Config;

pub use client::{ConnectionState, StreamClient};
pub use server::StreamServer;

/// Acknowledgment for a text item.
pub const ACK_TEXT: &str = "text received";
/// Acknowledgment for a file item.
pub const ACK_FILE: &str = "file received";
/// Acknowledgment for a folder item.
pub const ACK_FOLDER: &str = "folder received";
/// Acknowledgment for a clipboard item.
pub const ACK_CLIPBOARD: &str = "clipboard received";

/// Connection policy for a [`StreamClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Upper bound on a single connect attempt
    pub connect_timeout: Duration,
    /// Pause between attempts
    pub retry_delay: Duration,
    /// Attempts before giving up
    pub max_connect_attempts: u32,
    /// Bytes read from a source file per chunk
    pub chunk_size: usize,
    /// Enable TCP keep-alive
    pub keep_alive: bool,
}

impl ClientOptions {
    /// Options taken from the network and transfer sections of `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: config.network.connect_timeout,
            retry_delay: config.network.retry_delay,
            max_connect_attempts: config.network.max_connect_attempts.max(1),
            chunk_size: config.transfer.chunk_size,
            keep_alive: config.network.keep_alive,
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Listener policy for a [`StreamServer`].
#[derive(Clone)]
pub struct ServerOptions {
    /// Pause between bind or accept retries
    pub retry_delay: Duration,
    /// Bind attempts, and consecutive accept failures before rebinding
    pub max_bind_attempts: u32,
    /// Enable TCP keep-alive on accepted sockets
    pub keep_alive: bool,
    /// Where received clipboard text is written, if anywhere
    pub clipboard: Option<SharedClipboard>,
}

impl ServerOptions {
    /// Options taken from the network section of `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry_delay: config.network.retry_delay,
            max_bind_attempts: config.network.max_connect_attempts.max(1),
            keep_alive: config.network.keep_alive,
            clipboard: None,
        }
    }

    /// Write received clipboard text into `clipboard`.
    #[must_use]
    pub fn with_clipboard(mut self, clipboard: SharedClipboard) -> Self {
        self.clipboard = Some(clipboard);
        self
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl std::fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerOptions")
            .field("retry_delay", &self.retry_delay)
            .field("max_bind_attempts", &self.max_bind_attempts)
            .field("keep_alive", &self.keep_alive)
            .field("clipboard", &self.clipboard.is_some())
            .finish()
    }
}
