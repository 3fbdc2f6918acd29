//! Rendezvous configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coordinator::CoordinatorConfig;
use crate::events::DEFAULT_BUFFER_CAPACITY;
use crate::observers::{DEFAULT_OBSERVER_CAPACITY, OverflowPolicy};
use crate::token::ByteOrder;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[serde(rename = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Listening endpoints
    pub server: ServerConfig,

    /// Handshake deadlines and holder failure policy
    pub coordinator: CoordinatorConfig,

    /// Observer table and delivery
    pub observers: ObserverConfig,

    /// Event buffer
    pub events: EventsConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .rendezvous.yml
        let local_config = PathBuf::from(".rendezvous.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/rendezvous/rendezvous.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("rendezvous").join("rendezvous.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log settings, before logging is set up
    ///
    /// Errors are swallowed; the full load reports them later.
    pub fn load_log_settings(config_path: Option<&PathBuf>) -> LogSettings {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".rendezvous.yml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("rendezvous").join("rendezvous.yml"));
                }
                paths
            }
        };

        candidates
            .iter()
            .find(|p| p.exists())
            .and_then(|p| fs::read_to_string(p).ok())
            .and_then(|content| serde_yaml::from_str::<Config>(&content).ok())
            .map(|config| LogSettings {
                level: config.log_level,
                file: config.log_file,
            })
            .unwrap_or_default()
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Logging settings read ahead of the full config load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub level: Option<String>,
    pub file: Option<PathBuf>,
}

/// Listening endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address all endpoints bind to
    pub address: String,

    #[serde(rename = "requester-port")]
    pub requester_port: u16,

    #[serde(rename = "holder-port")]
    pub holder_port: u16,

    /// Observer endpoint; omitted means no live feed
    #[serde(rename = "observer-port")]
    pub observer_port: Option<u16>,

    /// Listen backlog per endpoint
    pub backlog: u32,

    /// Byte order used to render tokens as integers
    #[serde(rename = "token-byte-order")]
    pub token_byte_order: ByteOrder,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            requester_port: 7000,
            holder_port: 7001,
            observer_port: None,
            backlog: 5,
            token_byte_order: ByteOrder::default(),
        }
    }
}

impl ServerConfig {
    /// Apply command-line endpoint overrides; `None` keeps the configured value
    pub fn override_endpoints(
        &mut self,
        address: Option<String>,
        requester_port: Option<u16>,
        holder_port: Option<u16>,
        observer_port: Option<u16>,
    ) {
        if let Some(address) = address {
            self.address = address;
        }
        if let Some(port) = requester_port {
            self.requester_port = port;
        }
        if let Some(port) = holder_port {
            self.holder_port = port;
        }
        if observer_port.is_some() {
            self.observer_port = observer_port;
        }
    }
}

/// Observer table and delivery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObserverConfig {
    /// Number of observer slots
    pub capacity: usize,

    /// Policy when every slot is taken
    pub overflow: OverflowPolicy,

    /// Per-write delivery deadline in milliseconds (0 = wait forever)
    #[serde(rename = "write-timeout-ms")]
    pub write_timeout_ms: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_OBSERVER_CAPACITY,
            overflow: OverflowPolicy::default(),
            write_timeout_ms: 5_000,
        }
    }
}

impl ObserverConfig {
    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }
}

/// Event buffer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventsConfig {
    /// Buffered events before the coordinator waits
    pub buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_BUFFER_CAPACITY,
        }
    }
}
