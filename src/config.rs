//! Daemon configuration
//!
//! Configuration is read once at startup, from an optional TOML file with
//! command-line overrides layered on top, and is immutable afterwards.

use crate::session::KeepaliveCadence;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Complete daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    pub broker: BrokerSection,
    pub subscription: SubscriptionSection,
    pub keepalive: KeepaliveSection,
    pub daemon: DaemonSection,
}

/// Broker address and credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerSection {
    pub host: String,
    pub port: u16,
    /// Client identifier; defaults to `mqttcd-<pid>`
    pub client_id: Option<String>,
    pub username: Option<String>,
    /// Never written back out by `config --show`
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Environment variable holding the password, used when `password` is unset
    pub password_env: Option<String>,
    /// Seconds to wait for CONNACK
    pub connect_timeout_secs: u64,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: None,
            username: None,
            password: None,
            password_env: None,
            connect_timeout_secs: 10,
        }
    }
}

/// Subscription topic filter and requested QoS
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SubscriptionSection {
    pub topic: String,
    pub qos: QosLevel,
}

/// Keepalive negotiation and loop cadence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeepaliveSection {
    /// Keepalive interval announced in CONNECT, in seconds
    pub interval_secs: u64,
    pub mode: KeepaliveMode,
    /// Loop iterations between keepalives when `mode = "iterations"`
    pub iterations: u32,
    /// Upper bound of one receive poll, in milliseconds
    pub poll_timeout_ms: u64,
}

impl Default for KeepaliveSection {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            mode: KeepaliveMode::Interval,
            iterations: 31,
            poll_timeout_ms: 1000,
        }
    }
}

/// How the receive loop decides a keepalive is due
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeepaliveMode {
    /// Wall-clock deadline against the negotiated interval
    #[default]
    Interval,
    /// Fixed number of loop iterations
    Iterations,
}

impl FromStr for KeepaliveMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "interval" => Ok(KeepaliveMode::Interval),
            "iterations" => Ok(KeepaliveMode::Iterations),
            other => Err(ConfigError::InvalidConfig(format!(
                "keepalive mode must be 'interval' or 'iterations', got '{other}'"
            ))),
        }
    }
}

/// Process lifecycle options
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonSection {
    pub daemonize: bool,
    /// Append log events here instead of stderr
    pub log_file: Option<PathBuf>,
    /// Append received messages here
    pub output_file: Option<PathBuf>,
}

/// MQTT delivery guarantee level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QosLevel {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QosLevel {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(ConfigError::InvalidQos(other)),
        }
    }
}

impl From<QosLevel> for u8 {
    fn from(qos: QosLevel) -> Self {
        match qos {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

impl FromStr for QosLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level: u8 = s
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidConfig(format!("QoS must be 0, 1 or 2, got '{s}'")))?;
        QosLevel::try_from(level)
    }
}

impl fmt::Display for QosLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Missing required setting: {0}")]
    MissingField(&'static str),
    #[error("QoS must be 0, 1 or 2, got {0}")]
    InvalidQos(u8),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Values supplied on the command line; `None` keeps the file/default value
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic: Option<String>,
    pub qos: Option<QosLevel>,
    pub keepalive_secs: Option<u64>,
    pub keepalive_mode: Option<KeepaliveMode>,
    pub keepalive_iterations: Option<u32>,
    pub poll_timeout_ms: Option<u64>,
    pub daemonize: bool,
    pub log_file: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
}

impl DaemonConfig {
    /// Parse a TOML file; no overrides, env lookup or validation
    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Build the effective configuration from an optional file plus overrides
    pub fn resolve(
        file: Option<&Path>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => Self::read_file(path)?,
            None => DaemonConfig::default(),
        };
        config.apply(overrides);
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, o: ConfigOverrides) {
        if let Some(host) = o.host {
            self.broker.host = host;
        }
        if let Some(port) = o.port {
            self.broker.port = port;
        }
        if o.client_id.is_some() {
            self.broker.client_id = o.client_id;
        }
        if o.username.is_some() {
            self.broker.username = o.username;
        }
        if o.password.is_some() {
            self.broker.password = o.password;
        }
        if let Some(topic) = o.topic {
            self.subscription.topic = topic;
        }
        if let Some(qos) = o.qos {
            self.subscription.qos = qos;
        }
        if let Some(secs) = o.keepalive_secs {
            self.keepalive.interval_secs = secs;
        }
        if let Some(mode) = o.keepalive_mode {
            self.keepalive.mode = mode;
        }
        if let Some(iterations) = o.keepalive_iterations {
            self.keepalive.iterations = iterations;
        }
        if let Some(ms) = o.poll_timeout_ms {
            self.keepalive.poll_timeout_ms = ms;
        }
        // A flag can only switch daemon mode on
        self.daemon.daemonize |= o.daemonize;
        if o.log_file.is_some() {
            self.daemon.log_file = o.log_file;
        }
        if o.output_file.is_some() {
            self.daemon.output_file = o.output_file;
        }
    }

    /// Resolve the password from `password_env` when none was given directly
    fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if self.broker.password.is_none() {
            if let Some(name) = &self.broker.password_env {
                let value =
                    std::env::var(name).map_err(|_| ConfigError::EnvVarNotFound(name.clone()))?;
                self.broker.password = Some(value);
            }
        }
        Ok(())
    }

    /// Check the configuration before any connection is attempted
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::MissingField("broker.host"));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker port must be non-zero".to_string(),
            ));
        }
        if self.subscription.topic.is_empty() {
            return Err(ConfigError::MissingField("subscription.topic"));
        }
        validate_topic_filter(&self.subscription.topic)?;
        if self.broker.password.is_some() && self.broker.username.is_none() {
            return Err(ConfigError::InvalidConfig(
                "a password requires a username".to_string(),
            ));
        }
        if self.keepalive.interval_secs == 0 || self.keepalive.interval_secs > u16::MAX as u64 {
            return Err(ConfigError::InvalidConfig(format!(
                "keepalive interval must be between 1 and {} seconds",
                u16::MAX
            )));
        }
        // One poll plus the keepalive send must fit inside the interval
        if self.keepalive.poll_timeout_ms == 0
            || self.keepalive.poll_timeout_ms * 2 > self.keepalive.interval_secs * 1000
        {
            return Err(ConfigError::InvalidConfig(
                "poll timeout must be non-zero and at most half the keepalive interval"
                    .to_string(),
            ));
        }
        if self.keepalive.mode == KeepaliveMode::Iterations && self.keepalive.iterations == 0 {
            return Err(ConfigError::InvalidConfig(
                "keepalive iteration threshold must be non-zero".to_string(),
            ));
        }
        if self.broker.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "connect timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn client_id(&self) -> String {
        self.broker
            .client_id
            .clone()
            .unwrap_or_else(|| format!("mqttcd-{}", std::process::id()))
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive.interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.keepalive.poll_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.broker.connect_timeout_secs)
    }

    /// Keepalive trigger the receive loop should use
    pub fn keepalive_cadence(&self) -> KeepaliveCadence {
        match self.keepalive.mode {
            KeepaliveMode::Interval => KeepaliveCadence::Interval(self.keepalive_interval()),
            KeepaliveMode::Iterations => KeepaliveCadence::Iterations(self.keepalive.iterations),
        }
    }
}

/// Validate wildcard placement in an MQTT topic filter
fn validate_topic_filter(filter: &str) -> Result<(), ConfigError> {
    let levels: Vec<&str> = filter.split('/').collect();
    for (index, level) in levels.iter().enumerate() {
        let multi_level = level.contains('#');
        if multi_level && (*level != "#" || index != levels.len() - 1) {
            return Err(ConfigError::InvalidConfig(format!(
                "'#' must be the last level of topic filter '{filter}'"
            )));
        }
        if level.contains('+') && *level != "+" {
            return Err(ConfigError::InvalidConfig(format!(
                "'+' must occupy a whole level of topic filter '{filter}'"
            )));
        }
    }
    Ok(())
}
