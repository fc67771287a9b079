//! Minion configuration model.
//!
//! Loaded once at boot from a YAML file and/or CLI flags, validated, and then
//! treated as immutable. Keys use the controller's kebab-case names
//! (`broker-url`, `trap-port`, ...).

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result};

/// Broker property enabling TLS on the stream transport.
pub const PROP_TLS_ENABLED: &str = "tls-enabled";
/// Broker property naming a CA certificate used for TLS.
pub const PROP_TLS_CA_CERT: &str = "tls-ca-cert";
/// Broker property with the chunk size in bytes.
pub const PROP_MAX_BUFFER_SIZE: &str = "max-buffer-size";
/// Broker property with the message-log topic prefix.
pub const PROP_INSTANCE_ID: &str = "instance-id";
/// Broker property bounding in-flight chunked RPCs.
pub const PROP_REASSEMBLY_CAPACITY: &str = "reassembly-capacity";
/// Broker property with the stream transport reconnect delay in milliseconds.
pub const PROP_RECONNECT_DELAY: &str = "reconnect-delay";

/// Default chunk size for the message-log transport.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024;
/// Default topic prefix for the message-log transport.
pub const DEFAULT_INSTANCE_ID: &str = "OpenNMS";
/// Default number of RPC ids kept in the reassembly buffer.
pub const DEFAULT_REASSEMBLY_CAPACITY: usize = 1000;
/// Default reconnect delay for the stream transport.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Transport used to reach the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerType {
    /// Bidirectional gRPC streams.
    #[default]
    Grpc,
    /// Partitioned message log with chunking.
    Kafka,
}

impl FromStr for BrokerType {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "grpc" => Ok(Self::Grpc),
            "kafka" => Ok(Self::Kafka),
            other => Err(ApiError::invalid_config(
                "broker-type",
                format!("unknown broker type '{other}'"),
            )),
        }
    }
}

impl fmt::Display for BrokerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grpc => write!(f, "grpc"),
            Self::Kafka => write!(f, "kafka"),
        }
    }
}

/// Decoder attached to a telemetry listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParserKind {
    #[serde(rename = "Netflow5UDP")]
    Netflow5Udp,
    #[serde(rename = "Netflow9UDP")]
    Netflow9Udp,
    #[serde(rename = "IPFIXUDP")]
    IpfixUdp,
    #[serde(rename = "SFlowUDP")]
    SflowUdp,
    #[serde(rename = "NxosGRPC")]
    NxosGrpc,
    #[serde(rename = "ForwardUDP")]
    ForwardUdp,
}

impl ParserKind {
    /// Wire name used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Netflow5Udp => "Netflow5UDP",
            Self::Netflow9Udp => "Netflow9UDP",
            Self::IpfixUdp => "IPFIXUDP",
            Self::SflowUdp => "SFlowUDP",
            Self::NxosGrpc => "NxosGRPC",
            Self::ForwardUdp => "ForwardUDP",
        }
    }

    /// Whether the listener decodes flow datagrams.
    pub fn is_flow(&self) -> bool {
        matches!(
            self,
            Self::Netflow5Udp | Self::Netflow9Udp | Self::IpfixUdp | Self::SflowUdp
        )
    }
}

impl FromStr for ParserKind {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self> {
        [
            Self::Netflow5Udp,
            Self::Netflow9Udp,
            Self::IpfixUdp,
            Self::SflowUdp,
            Self::NxosGrpc,
            Self::ForwardUdp,
        ]
        .into_iter()
        .find(|p| p.as_str().eq_ignore_ascii_case(s))
        .ok_or_else(|| ApiError::invalid_config("parser", format!("unknown parser '{s}'")))
    }
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A telemetry listener owned by a sink module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub name: String,
    /// UDP or gRPC port; 0 disables the listener.
    #[serde(default)]
    pub port: u16,
    pub parser: ParserKind,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl Listener {
    pub fn is_enabled(&self) -> bool {
        self.port > 0
    }

    /// Sink module id used for messages from this listener.
    pub fn module_id(&self) -> String {
        format!("Telemetry-{}", self.name)
    }
}

/// Parses the CLI form `NAME,PORT,PARSER`.
impl FromStr for Listener {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return Err(ApiError::invalid_config(
                "listener",
                format!("expected NAME,PORT,PARSER but got '{s}'"),
            ));
        }
        let port = parts[1].parse::<u16>().map_err(|e| {
            ApiError::invalid_config("listener", format!("invalid port '{}': {e}", parts[1]))
        })?;
        Ok(Self {
            name: parts[0].to_string(),
            port,
            parser: parts[2].parse()?,
            properties: HashMap::new(),
        })
    }
}

/// Complete minion configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MinionConfig {
    #[serde(default = "default_id")]
    pub id: String,

    #[serde(default = "default_location")]
    pub location: String,

    #[serde(default)]
    pub broker_type: BrokerType,

    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    #[serde(default)]
    pub broker_properties: HashMap<String, String>,

    /// SNMP trap UDP port; 0 disables.
    #[serde(default = "default_trap_port")]
    pub trap_port: u16,

    /// Syslog UDP and TCP port; 0 disables.
    #[serde(default = "default_syslog_port")]
    pub syslog_port: u16,

    /// Prometheus exporter port; 0 disables.
    #[serde(default = "default_stats_port")]
    pub stats_port: u16,

    #[serde(default)]
    pub listeners: Vec<Listener>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_id() -> String {
    "minion1".to_string()
}

fn default_location() -> String {
    "MINION".to_string()
}

fn default_broker_url() -> String {
    "localhost:8990".to_string()
}

fn default_trap_port() -> u16 {
    1162
}

fn default_syslog_port() -> u16 {
    1514
}

fn default_stats_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MinionConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            location: default_location(),
            broker_type: BrokerType::default(),
            broker_url: default_broker_url(),
            broker_properties: HashMap::new(),
            trap_port: default_trap_port(),
            syslog_port: default_syslog_port(),
            stats_port: default_stats_port(),
            listeners: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

impl MinionConfig {
    /// Parses a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Loads configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Serializes the configuration back to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Raw broker property.
    pub fn broker_property(&self, key: &str) -> Option<&str> {
        self.broker_properties.get(key).map(String::as_str)
    }

    pub fn tls_enabled(&self) -> bool {
        self.broker_property(PROP_TLS_ENABLED)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    }

    /// Chunk size in bytes; 0 disables chunking.
    pub fn max_buffer_size(&self) -> usize {
        self.broker_property(PROP_MAX_BUFFER_SIZE)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_MAX_BUFFER_SIZE)
    }

    pub fn instance_id(&self) -> &str {
        self.broker_property(PROP_INSTANCE_ID)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_INSTANCE_ID)
    }

    pub fn reassembly_capacity(&self) -> usize {
        self.broker_property(PROP_REASSEMBLY_CAPACITY)
            .and_then(|v| v.trim().parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_REASSEMBLY_CAPACITY)
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.broker_property(PROP_RECONNECT_DELAY)
            .and_then(|v| v.trim().parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RECONNECT_DELAY)
    }

    /// Broker properties that are not interpreted by the minion itself.
    pub fn passthrough_properties(&self) -> impl Iterator<Item = (&String, &String)> {
        const RESERVED: [&str; 6] = [
            PROP_TLS_ENABLED,
            PROP_TLS_CA_CERT,
            PROP_MAX_BUFFER_SIZE,
            PROP_INSTANCE_ID,
            PROP_REASSEMBLY_CAPACITY,
            PROP_RECONNECT_DELAY,
        ];
        self.broker_properties
            .iter()
            .filter(|(k, _)| !RESERVED.contains(&k.as_str()))
    }

    pub fn enabled_listeners(&self) -> impl Iterator<Item = &Listener> {
        self.listeners.iter().filter(|l| l.is_enabled())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ApiError::invalid_config("id", "must not be empty"));
        }
        if self.location.trim().is_empty() {
            return Err(ApiError::invalid_config("location", "must not be empty"));
        }
        if self.broker_url.trim().is_empty() {
            return Err(ApiError::invalid_config("broker-url", "must not be empty"));
        }
        if let Some(size) = self.broker_property(PROP_MAX_BUFFER_SIZE) {
            size.trim().parse::<usize>().map_err(|_| {
                ApiError::invalid_config(
                    PROP_MAX_BUFFER_SIZE,
                    format!("'{size}' is not a byte count"),
                )
            })?;
        }

        let mut names = HashSet::new();
        let mut ports = HashSet::new();
        if self.trap_port > 0 {
            ports.insert(self.trap_port);
        }
        if self.syslog_port > 0 && !ports.insert(self.syslog_port) {
            return Err(ApiError::invalid_config(
                "syslog-port",
                format!("port {} already used by trap-port", self.syslog_port),
            ));
        }
        for listener in &self.listeners {
            if listener.name.trim().is_empty() {
                return Err(ApiError::invalid_config("listeners", "listener without name"));
            }
            if !names.insert(listener.name.as_str()) {
                return Err(ApiError::invalid_config(
                    "listeners",
                    format!("duplicate listener name '{}'", listener.name),
                ));
            }
            if listener.is_enabled() && !ports.insert(listener.port) {
                return Err(ApiError::invalid_config(
                    "listeners",
                    format!(
                        "listener '{}' port {} is already in use",
                        listener.name, listener.port
                    ),
                ));
            }
        }
        Ok(())
    }
}
