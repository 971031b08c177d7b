//! Datagram (UDP) transport.
//!
//! Every frame is one datagram. There is no acknowledgment, ordering or
//! retransmission: a lost `C` datagram leaves a short file behind. The
//! server processes datagrams strictly in arrival order and keeps a single
//! [`ServerSession`], so concurrent senders interleave and corrupt each
//! other.

pub mod client;
pub mod server;

use std::time::Duration;

use crate::clipboard::SharedClipboard;
use crate::config::Config;
use crate::protocol::MAX_DATAGRAM_CHUNK;

pub use client::DatagramClient;
pub use server::{DatagramServer, ServerSession};

/// Sending policy for a [`DatagramClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// File bytes per `C` datagram, at most [`MAX_DATAGRAM_CHUNK`]
    pub chunk_size: usize,
    /// Pause after each datagram
    pub pacing: Duration,
}

impl ClientOptions {
    /// Options taken from `config`, with the chunk size clamped to fit a
    /// datagram.
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.transfer.chunk_size.clamp(1, MAX_DATAGRAM_CHUNK),
            pacing: config.network.datagram_pacing,
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Receiving policy for a [`DatagramServer`].
#[derive(Clone, Default)]
pub struct ServerOptions {
    /// Requested kernel receive buffer in bytes (zero keeps the OS default)
    pub receive_buffer_size: usize,
    /// Where received clipboard text is written, if anywhere
    pub clipboard: Option<SharedClipboard>,
}

impl ServerOptions {
    /// Options taken from the transfer section of `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            receive_buffer_size: config.transfer.receive_buffer_size,
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

impl std::fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerOptions")
            .field("receive_buffer_size", &self.receive_buffer_size)
            .field("clipboard", &self.clipboard.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size_is_clamped() {
        let mut config = Config::default();
        config.transfer.chunk_size = 1024 * 1024;
        assert_eq!(ClientOptions::from_config(&config).chunk_size, MAX_DATAGRAM_CHUNK);

        config.transfer.chunk_size = 8192;
        assert_eq!(ClientOptions::from_config(&config).chunk_size, 8192);
    }
}
