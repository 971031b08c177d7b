//! Configuration management for AvaSend.
//!
//! This module handles loading, saving, and validating AvaSend configuration.
//! A [`Config`] is passed by reference into the transport constructors; the
//! core never reads global state.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/avasend/config.toml` |
//! | macOS | `~/Library/Application Support/com.avasend.AvaSend/config.toml` |
//! | Windows | `%APPDATA%\AvaSend\AvaSend\config\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use avasend_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Saving to: {}", config.general.save_folder.display());
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for AvaSend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Network settings
    pub network: NetworkConfig,
    /// Transfer settings
    pub transfer: TransferConfig,
}

/// General configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Display name of this device
    pub device_name: String,
    /// Folder where received items are saved
    pub save_folder: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            device_name: hostname::get().map_or_else(
                |_| "AvaSend Device".to_string(),
                |h| h.to_string_lossy().to_string(),
            ),
            save_folder: default_save_folder(),
        }
    }
}

/// Which socket binding carries the protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Connection-oriented TCP with acknowledgments
    #[default]
    Tcp,
    /// Fire-and-forget UDP datagrams
    Udp,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
        }
    }
}

/// Network configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Transport used when none is given explicitly
    pub transport: TransportKind,
    /// Address servers bind to
    pub bind_address: IpAddr,
    /// Stream transport port
    pub tcp_port: u16,
    /// Datagram transport port
    pub udp_port: u16,
    /// Upper bound on a single connect attempt
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Pause between connect attempts
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
    /// Connect attempts before giving up
    pub max_connect_attempts: u32,
    /// Pause between consecutive datagrams (zero disables pacing)
    #[serde(with = "humantime_serde")]
    pub datagram_pacing: Duration,
    /// Enable TCP keep-alive on stream sockets
    pub keep_alive: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Tcp,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tcp_port: crate::DEFAULT_TCP_PORT,
            udp_port: crate::DEFAULT_UDP_PORT,
            connect_timeout: Duration::from_millis(3000),
            retry_delay: Duration::from_secs(2),
            max_connect_attempts: 5,
            datagram_pacing: Duration::ZERO,
            keep_alive: true,
        }
    }
}

impl NetworkConfig {
    /// Port configured for the given transport.
    #[must_use]
    pub const fn port_for(&self, transport: TransportKind) -> u16 {
        match transport {
            TransportKind::Tcp => self.tcp_port,
            TransportKind::Udp => self.udp_port,
        }
    }
}

/// Transfer configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bytes read from a source file per chunk
    pub chunk_size: usize,
    /// Requested kernel receive buffer for the datagram server
    pub receive_buffer_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            receive_buffer_size: 4 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path, falling back to defaults
    /// when the file is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as pretty TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = self.to_toml_string()?;

        std::fs::write(path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Check values that would make a transfer impossible.
    pub fn validate(&self) -> Result<()> {
        if self.transfer.chunk_size == 0 {
            return Err(invalid("transfer.chunk_size", "must be greater than zero"));
        }
        if self.transfer.chunk_size > crate::protocol::MAX_FIELD_LEN {
            return Err(invalid(
                "transfer.chunk_size",
                &format!("must not exceed {} bytes", crate::protocol::MAX_FIELD_LEN),
            ));
        }
        if self.network.max_connect_attempts == 0 {
            return Err(invalid(
                "network.max_connect_attempts",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "avasend", "AvaSend")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

fn invalid(key: &str, reason: &str) -> Error {
    Error::InvalidConfig {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

/// `<Downloads>/AvaSend`, falling back to the platform data dir.
fn default_save_folder() -> PathBuf {
    directories::UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
        .or_else(|| {
            directories::ProjectDirs::from("com", "avasend", "AvaSend")
                .map(|dirs| dirs.data_dir().to_path_buf())
        })
        .unwrap_or_else(|| PathBuf::from("."))
        .join("AvaSend")
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis();
        if millis % 1000 == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{millis}ms"))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();
        s.strip_suffix("ms")
            .map(|ms| {
                ms.parse()
                    .map(Duration::from_millis)
                    .map_err(serde::de::Error::custom)
            })
            .or_else(|| {
                s.strip_suffix('s').map(|secs| {
                    secs.parse()
                        .map(Duration::from_secs)
                        .map_err(serde::de::Error::custom)
                })
            })
            .or_else(|| {
                s.strip_suffix('m').map(|mins| {
                    mins.parse::<u64>()
                        .map(|m| Duration::from_secs(m * 60))
                        .map_err(serde::de::Error::custom)
                })
            })
            .unwrap_or_else(|| Err(serde::de::Error::custom("invalid duration format")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.network.tcp_port, 8080);
        assert_eq!(config.network.udp_port, 8081);
        assert_eq!(config.network.connect_timeout, Duration::from_millis(3000));
        assert_eq!(config.network.retry_delay, Duration::from_secs(2));
        assert_eq!(config.network.max_connect_attempts, 5);
        assert_eq!(config.transfer.chunk_size, 8192);
        assert!(config.general.save_folder.ends_with("AvaSend"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = Config::default();
        original.general.device_name = "Test Device".to_string();
        original.network.transport = TransportKind::Udp;
        original.network.udp_port = 12345;
        original.network.datagram_pacing = Duration::from_millis(5);
        original.transfer.chunk_size = 64 * 1024;

        original.save_to(&config_path).expect("save");
        let loaded = Config::load_from(&config_path).expect("load");

        assert_eq!(loaded.general.device_name, "Test Device");
        assert_eq!(loaded.network.transport, TransportKind::Udp);
        assert_eq!(loaded.network.udp_port, 12345);
        assert_eq!(loaded.network.datagram_pacing, Duration::from_millis(5));
        assert_eq!(loaded.transfer.chunk_size, 64 * 1024);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_from(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.network.tcp_port, crate::DEFAULT_TCP_PORT);
    }

    #[test]
    fn test_config_serialization() {
        let toml_str = Config::default().to_toml_string().unwrap();

        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[network]"));
        assert!(toml_str.contains("[transfer]"));
        assert!(toml_str.contains("transport = \"tcp\""));
        assert!(toml_str.contains("connect_timeout = \"3s\""));
    }

    #[test]
    fn test_config_deserialization_partial() {
        let partial_toml = r#"
[general]
device_name = "My Custom Device"

[network]
tcp_port = 9999
connect_timeout = "1500ms"
"#;

        let config = Config::from_toml_str(partial_toml).expect("parse partial config");

        assert_eq!(config.general.device_name, "My Custom Device");
        assert_eq!(config.network.tcp_port, 9999);
        assert_eq!(config.network.connect_timeout, Duration::from_millis(1500));

        assert_eq!(config.network.retry_delay, Duration::from_secs(2));
        assert_eq!(config.transfer.chunk_size, crate::DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_duration_formats() {
        let config = Config::from_toml_str(
            r#"
[network]
connect_timeout = "3000ms"
retry_delay = "1m"
datagram_pacing = "0s"
"#,
        )
        .unwrap();

        assert_eq!(config.network.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.network.retry_delay, Duration::from_secs(60));
        assert_eq!(config.network.datagram_pacing, Duration::ZERO);

        assert!(Config::from_toml_str("[network]\nretry_delay = \"soon\"\n").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let err = Config::from_toml_str("[transfer]\nchunk_size = 0\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { ref key, .. } if key == "transfer.chunk_size"));

        let err =
            Config::from_toml_str("[network]\nmax_connect_attempts = 0\n").unwrap_err();
        assert!(
            matches!(err, Error::InvalidConfig { ref key, .. } if key == "network.max_connect_attempts")
        );

        let mut config = Config::default();
        config.transfer.chunk_size = crate::protocol::MAX_FIELD_LEN + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_port_for_transport() {
        let config = NetworkConfig::default();
        assert_eq!(config.port_for(TransportKind::Tcp), 8080);
        assert_eq!(config.port_for(TransportKind::Udp), 8081);
    }

    #[test]
    fn test_config_path() {
        let path = Config::config_path();
        assert!(path.ends_with("config.toml"));
    }
}
