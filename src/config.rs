//! # Configuration Management
//!
//! Centralized configuration for buffers, connection establishment, the
//! listening side and logging.
//!
//! A [`WireConfig`] is the explicit context handed to buffer, handshake and
//! server constructors; nothing in the crate reads configuration from global
//! state.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Environment variables via `from_env()` (`LAUNCHWIRE_*`)
//! - Direct instantiation with defaults

use crate::core::buffer::{BufferMode, DEFAULT_INITIAL_SIZE, DEFAULT_THRESHOLD_SIZE};
use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Protocol version announced in the identity message
pub const PROTOCOL_VERSION: &str = "4.2.0";

/// Default connect attempts before a peer is declared unreachable
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Default handshake attempts after a temporarily-unavailable reply
pub const DEFAULT_HANDSHAKE_MAX_RETRIES: u32 = 2;

/// Default bound on short reads of a rendezvous file
pub const DEFAULT_SHORT_READ_RETRIES: u32 = 3;

/// Largest identity message tail a server accepts
pub const MAX_HANDSHAKE_SIZE: usize = 64 * 1024;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct WireConfig {
    /// Buffer growth and encoding mode
    #[serde(default)]
    pub buffer: BufferConfig,

    /// Connecting side: retries, timeouts, rendezvous discovery
    #[serde(default)]
    pub connect: ConnectConfig,

    /// Listening side
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl WireConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("LAUNCHWIRE_TMPDIR") {
            config.connect.system_tmpdir = Some(PathBuf::from(dir));
        }

        if let Ok(dir) = std::env::var("LAUNCHWIRE_RENDEZVOUS_DIR") {
            config.connect.rendezvous_dir = Some(PathBuf::from(dir));
        }

        if let Ok(retries) = std::env::var("LAUNCHWIRE_MAX_RETRIES") {
            config.connect.max_retries = parse_env("LAUNCHWIRE_MAX_RETRIES", &retries)?;
        }

        if let Ok(retries) = std::env::var("LAUNCHWIRE_HANDSHAKE_MAX_RETRIES") {
            config.connect.handshake_max_retries =
                parse_env("LAUNCHWIRE_HANDSHAKE_MAX_RETRIES", &retries)?;
        }

        if let Ok(wait) = std::env::var("LAUNCHWIRE_HANDSHAKE_TIMEOUT_MS") {
            let millis: u64 = parse_env("LAUNCHWIRE_HANDSHAKE_TIMEOUT_MS", &wait)?;
            config.connect.handshake_timeout = Duration::from_millis(millis);
        }

        if let Ok(wait) = std::env::var("LAUNCHWIRE_WAIT_TO_CONNECT_MS") {
            let millis: u64 = parse_env("LAUNCHWIRE_WAIT_TO_CONNECT_MS", &wait)?;
            config.connect.wait_to_connect = Duration::from_millis(millis);
        }

        if let Ok(mode) = std::env::var("LAUNCHWIRE_BUFFER_MODE") {
            config.buffer.default_mode = match mode.as_str() {
                "condensed" => BufferMode::Condensed,
                "self-describing" => BufferMode::SelfDescribing,
                other => {
                    return Err(ProtocolError::ConfigError(format!(
                        "Invalid LAUNCHWIRE_BUFFER_MODE: '{other}'"
                    )))
                }
            };
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.buffer.validate());
        errors.extend(self.connect.validate());
        errors.extend(self.server.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {name}: '{raw}'")))
}

/// Buffer growth policy and default encoding mode
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferConfig {
    /// Capacity of the first allocation
    pub initial_size: usize,

    /// Capacity above which growth rounds up to a multiple of this value
    pub threshold_size: usize,

    /// Mode of newly created buffers
    pub default_mode: BufferMode,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            initial_size: DEFAULT_INITIAL_SIZE,
            threshold_size: DEFAULT_THRESHOLD_SIZE,
            default_mode: BufferMode::SelfDescribing,
        }
    }
}

impl BufferConfig {
    /// Validate buffer configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.initial_size == 0 {
            errors.push("Initial buffer size must be greater than 0".to_string());
        }

        if self.threshold_size == 0 {
            errors.push("Buffer threshold size must be greater than 0".to_string());
        } else if self.initial_size > self.threshold_size {
            errors.push(format!(
                "Initial buffer size {} exceeds threshold size {}",
                self.initial_size, self.threshold_size
            ));
        }

        errors
    }
}

/// Connecting-side configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectConfig {
    /// Connect attempts before the peer is declared unreachable
    pub max_retries: u32,

    /// Pause between connect attempts
    #[serde(with = "duration_serde")]
    pub retry_delay: Duration,

    /// Handshake attempts after the peer reports a temporary failure
    pub handshake_max_retries: u32,

    /// Socket receive timeout during the blocking handshake
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Pause between checks for a rendezvous file that has not appeared yet
    #[serde(with = "duration_serde")]
    pub wait_to_connect: Duration,

    /// Checks for a missing rendezvous file before giving up
    pub rendezvous_retries: u32,

    /// Re-reads of a rendezvous file that was still being written
    pub short_read_retries: u32,

    /// Session temp directory of the server to contact
    #[serde(default)]
    pub system_tmpdir: Option<PathBuf>,

    /// Root directory searched for rendezvous files
    #[serde(default)]
    pub rendezvous_dir: Option<PathBuf>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::ZERO,
            handshake_max_retries: DEFAULT_HANDSHAKE_MAX_RETRIES,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            wait_to_connect: timeout::RENDEZVOUS_POLL_INTERVAL,
            rendezvous_retries: DEFAULT_MAX_RETRIES,
            short_read_retries: DEFAULT_SHORT_READ_RETRIES,
            system_tmpdir: None,
            rendezvous_dir: None,
        }
    }
}

impl ConnectConfig {
    /// Validate connect configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_retries == 0 {
            errors.push("Max connect retries must be greater than 0".to_string());
        } else if self.max_retries > 1000 {
            errors.push(format!(
                "Max connect retries too large: {} (maximum: 1000)",
                self.max_retries
            ));
        }

        if self.handshake_max_retries == 0 {
            errors.push("Handshake max retries must be greater than 0".to_string());
        }

        if self.handshake_timeout.as_millis() < 10 {
            errors.push("Handshake timeout too short (minimum: 10ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        if self.retry_delay.as_secs() > 60 {
            errors.push("Retry delay too long (maximum: 60s)".to_string());
        }

        if self.wait_to_connect.as_secs() > 60 {
            errors.push("Wait to connect too long (maximum: 60s)".to_string());
        }

        if self.short_read_retries == 0 {
            errors.push("Short read retries must be greater than 0".to_string());
        }

        for (name, dir) in [
            ("system_tmpdir", &self.system_tmpdir),
            ("rendezvous_dir", &self.rendezvous_dir),
        ] {
            if let Some(dir) = dir {
                if !dir.is_dir() {
                    errors.push(format!("{name} does not exist: {}", dir.display()));
                }
            }
        }

        errors
    }
}

/// Listening-side configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Local socket the listener binds
    pub socket_path: PathBuf,

    /// Largest identity message tail accepted from a connecting peer
    pub max_handshake_size: usize,

    /// Socket receive timeout while reading a peer's identity
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: std::env::temp_dir().join("launchwire.sock"),
            max_handshake_size: MAX_HANDSHAKE_SIZE,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.socket_path.as_os_str().is_empty() {
            errors.push("Socket path cannot be empty".to_string());
        }

        if self.max_handshake_size < 64 {
            errors.push("Max handshake size too small (minimum: 64 bytes)".to_string());
        } else if self.max_handshake_size > 16 * 1024 * 1024 {
            errors.push(format!(
                "Max handshake size too large: {} bytes (maximum: 16 MB)",
                self.max_handshake_size
            ));
        }

        if self.handshake_timeout.as_millis() < 10 {
            errors.push("Handshake timeout too short (minimum: 10ms)".to_string());
        }

        if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("launchwire"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
