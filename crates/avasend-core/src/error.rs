//! Error types for AvaSend.
//!
//! This module provides a unified error type for all AvaSend operations,
//! with specific error variants for different failure modes, and a coarse
//! [`ErrorKind`] that the embedding application can show to the user.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// A specialized `Result` type for AvaSend operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for AvaSend.
#[derive(Error, Debug)]
pub enum Error {
    /// Bounded connection retries were exhausted (E001)
    #[error("could not connect to {addr} after {attempts} attempts")]
    ConnectFailed {
        /// Peer address
        addr: SocketAddr,
        /// Number of attempts made
        attempts: u32,
    },

    /// Peer disconnected in the middle of a transfer (E002)
    #[error("connection closed by peer")]
    TransportClosed,

    /// Malformed field or unknown tag on the wire (E003)
    #[error("framing error: {0}")]
    FramingError(String),

    /// Local source file vanished or could not be read (E004)
    #[error("source '{path}' unavailable: {reason}")]
    SourceUnavailable {
        /// Source path
        path: String,
        /// Reason for failure
        reason: String,
    },

    /// Destination could not be written (E005)
    #[error("cannot write '{path}': {reason}")]
    DestinationError {
        /// Destination path
        path: String,
        /// Reason for failure
        reason: String,
    },

    /// Send attempted with no active connection
    #[error("not connected")]
    NotConnected,

    /// Relative path rejected by the resolver
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Operation cancelled by an explicit stop
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Clipboard access failed
    #[error("clipboard error: {0}")]
    ClipboardError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Coarse error category reported to the embedding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Could not reach the peer
    Connect,
    /// Peer went away mid-transfer
    TransportClosed,
    /// Peer sent something that does not parse
    Framing,
    /// Local file could not be read
    Source,
    /// Received data could not be saved
    Destination,
    /// No open connection
    NotConnected,
    /// Path was rejected
    InvalidPath,
    /// Stopped by the caller
    Cancelled,
    /// Bad configuration
    Config,
    /// Clipboard unavailable
    Clipboard,
    /// Anything else from the OS
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::TransportClosed => "transport closed",
            Self::Framing => "framing",
            Self::Source => "source",
            Self::Destination => "destination",
            Self::NotConnected => "not connected",
            Self::InvalidPath => "invalid path",
            Self::Cancelled => "cancelled",
            Self::Config => "config",
            Self::Clipboard => "clipboard",
            Self::Io => "io",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::ConnectFailed { .. } => Some("E001"),
            Self::TransportClosed => Some("E002"),
            Self::FramingError(_) => Some("E003"),
            Self::SourceUnavailable { .. } => Some("E004"),
            Self::DestinationError { .. } => Some("E005"),
            _ => None,
        }
    }

    /// Returns the category shown to the user.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectFailed { .. } => ErrorKind::Connect,
            Self::TransportClosed => ErrorKind::TransportClosed,
            Self::FramingError(_) => ErrorKind::Framing,
            Self::SourceUnavailable { .. } => ErrorKind::Source,
            Self::DestinationError { .. } => ErrorKind::Destination,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::InvalidPath(_) => ErrorKind::InvalidPath,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::ConfigError(_) | Self::InvalidConfig { .. } => ErrorKind::Config,
            Self::ClipboardError(_) => ErrorKind::Clipboard,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns whether this error is recoverable (can be retried).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. } | Self::TransportClosed | Self::NotConnected
        )
    }

    /// Maps a read error so that a truncated stream reads as a disconnect.
    pub(crate) fn from_read(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::TransportClosed,
            _ => Self::Io(err),
        }
    }
}
