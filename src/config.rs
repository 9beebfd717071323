//! Configuration for the broker supervisor and its monitor client
//!
//! The broker engine consumes a flat, string-keyed property set, so the TOML
//! configuration file is flattened into [`Properties`] before use. Numeric
//! properties stay strings until the point of use; a malformed value is a
//! structured [`ConfigError`] there, never a silent default.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

// Property keys as the broker engine expects them
pub const PROP_HOST: &str = "host";
pub const PROP_PORT: &str = "port";
pub const PROP_MESSAGE_SIZE: &str = "netty.mqtt.message_size";
pub const PROP_IMMEDIATE_BUFFER_FLUSH: &str = "immediate_buffer_flush";
pub const PROP_SYS_INTERVAL: &str = "sysmsginterval";
pub const PROP_HEARTBEAT_INTERVAL: &str = "heartbeatinterval";
pub const PROP_WAKE_DURATION: &str = "wakelockduration";
pub const PROP_ALLOW_ANONYMOUS: &str = "allow_anonymous";

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Missing property: {0}")]
    MissingProperty(String),
    #[error("Invalid numeric property {key}: '{value}'")]
    InvalidNumber { key: String, value: String },
}

/// String-keyed property surface shared with the broker engine.
///
/// Read-only once handed to the broker and client contexts; the two sides
/// never share any other state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties(HashMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingProperty(key.to_string()))
    }

    /// Parse a numeric property at the point of use. Malformed values are
    /// configuration errors, surfaced to the caller.
    pub fn require_u64(&self, key: &str) -> Result<u64, ConfigError> {
        let value = self.require(key)?;
        value.parse().map_err(|_| ConfigError::InvalidNumber {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Heartbeat interval in seconds; `0` disables heartbeats.
    pub fn heartbeat_interval_secs(&self) -> Result<u64, ConfigError> {
        self.require_u64(PROP_HEARTBEAT_INTERVAL)
    }

    /// $SYS status interval in seconds; `0` disables the periodic tick.
    pub fn sys_interval_secs(&self) -> Result<u64, ConfigError> {
        self.require_u64(PROP_SYS_INTERVAL)
    }

    pub fn host(&self) -> Result<&str, ConfigError> {
        self.require(PROP_HOST)
    }

    pub fn port(&self) -> Result<u16, ConfigError> {
        let value = self.require(PROP_PORT)?;
        value.parse().map_err(|_| ConfigError::InvalidNumber {
            key: PROP_PORT.to_string(),
            value: value.to_string(),
        })
    }

    /// Host to dial from the client side. A broker listening on the wildcard
    /// address is reached via loopback.
    pub fn connect_host(&self) -> Result<&str, ConfigError> {
        Ok(match self.host()? {
            "0.0.0.0" => "localhost",
            other => other,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Monitor configuration file contents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    pub broker: BrokerSection,
    #[serde(default)]
    pub client: ClientSection,
}

/// Broker engine settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Bind address for the broker engine
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum MQTT message size in bytes
    #[serde(default = "default_message_size")]
    pub message_size: u64,
    /// $SYS status publication interval in seconds (0 disables)
    #[serde(default)]
    pub sys_interval_secs: u64,
    /// Heartbeat interval in seconds (0 disables)
    #[serde(default)]
    pub heartbeat_interval_secs: u64,
    /// Wake lock duration in hours (0 disables; consumed by the host process,
    /// carried here because the engine property set includes it)
    #[serde(default)]
    pub wake_duration_hours: u64,
    #[serde(default = "default_true")]
    pub allow_anonymous: bool,
    #[serde(default = "default_true")]
    pub immediate_buffer_flush: bool,
}

/// Monitor client settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// Client identity embedded in every outbound envelope and used to
    /// recognize self-originated heartbeats
    #[serde(default = "default_client_id")]
    pub id: String,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            id: default_client_id(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_message_size() -> u64 {
    8092
}

fn default_true() -> bool {
    true
}

fn default_client_id() -> String {
    "MoqmonTester".to_string()
}

impl MonitorConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: MonitorConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Flatten into the string-keyed property surface the broker engine and
    /// the topic handlers consume.
    pub fn to_properties(&self) -> Properties {
        let mut props = Properties::new();
        props.set(PROP_HOST, &self.broker.host);
        props.set(PROP_PORT, self.broker.port.to_string());
        props.set(PROP_MESSAGE_SIZE, self.broker.message_size.to_string());
        props.set(
            PROP_IMMEDIATE_BUFFER_FLUSH,
            self.broker.immediate_buffer_flush.to_string(),
        );
        props.set(PROP_SYS_INTERVAL, self.broker.sys_interval_secs.to_string());
        props.set(
            PROP_HEARTBEAT_INTERVAL,
            self.broker.heartbeat_interval_secs.to_string(),
        );
        props.set(
            PROP_WAKE_DURATION,
            self.broker.wake_duration_hours.to_string(),
        );
        props.set(PROP_ALLOW_ANONYMOUS, self.broker.allow_anonymous.to_string());
        props
    }
}
