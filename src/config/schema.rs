//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML, and every
//! field has a default so a minimal (or empty) file is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::transport::{ConstructionError, TransportConfig};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// Upstream address, timeout and transport selection.
    pub upstream: UpstreamConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Bus tunnel responder settings (`tunnel-responder` mode only).
    pub responder: ResponderConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Upstream the gateway forwards to.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL requests are forwarded to (e.g., "http://127.0.0.1:8081").
    pub base_url: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// How requests reach the upstream.
    pub transport: TransportSettings,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".to_string(),
            timeout_secs: 60,
            transport: TransportSettings::default(),
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn parsed_base_url(&self) -> Result<Url, ConstructionError> {
        Url::parse(&self.base_url).map_err(|e| ConstructionError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })
    }

    /// Runtime transport configuration for this upstream.
    pub fn transport_config(&self) -> TransportConfig {
        match &self.transport {
            TransportSettings::DirectDial {
                max_idle_conns,
                max_idle_conns_per_host,
            } => TransportConfig::DirectDial {
                timeout: self.timeout(),
                max_idle_conns: *max_idle_conns,
                max_idle_conns_per_host: *max_idle_conns_per_host,
            },
            TransportSettings::BusTunnel {
                address,
                port,
                subject_prefix,
            } => TransportConfig::BusTunnel {
                address: address.clone(),
                port: *port,
                subject_prefix: subject_prefix.clone(),
            },
        }
    }
}

/// Transport selection, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportSettings {
    /// Dial the upstream directly with a pooled client.
    DirectDial {
        /// Idle connections kept overall (0 = unlimited).
        #[serde(default = "default_max_idle_conns")]
        max_idle_conns: usize,

        /// Idle connections kept per host (0 = 2).
        #[serde(default = "default_max_idle_conns")]
        max_idle_conns_per_host: usize,
    },

    /// Relay over a NATS server.
    BusTunnel {
        #[serde(default = "default_bus_address")]
        address: String,

        #[serde(default = "default_bus_port")]
        port: u16,

        #[serde(default = "default_subject_prefix")]
        subject_prefix: String,
    },
}

impl Default for TransportSettings {
    fn default() -> Self {
        TransportSettings::DirectDial {
            max_idle_conns: default_max_idle_conns(),
            max_idle_conns_per_host: default_max_idle_conns(),
        }
    }
}

fn default_max_idle_conns() -> usize {
    1024
}

fn default_bus_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bus_port() -> u16 {
    4222
}

fn default_subject_prefix() -> String {
    "faas".to_string()
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Time in-flight requests get to finish after the shutdown signal.
    pub grace_period_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 1000,
        }
    }
}

impl ShutdownConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Bus tunnel responder configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// Local backend tunnelled requests are executed against.
    pub backend_url: String,

    /// Idle connections kept to the backend (0 = unlimited).
    pub max_idle_conns: usize,

    /// Idle connections kept per backend host (0 = 2).
    pub max_idle_conns_per_host: usize,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8081".to_string(),
            max_idle_conns: default_max_idle_conns(),
            max_idle_conns_per_host: default_max_idle_conns(),
        }
    }
}
