//! Configuration types for fksd.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    #[serde(default)]
    pub dns: DnsConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for the DNS server to listen on (UDP and TCP).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Identity holding every capability. Normalized to a lowercase fqdn.
    #[serde(default = "default_superuser")]
    pub superuser: String,

    /// Base64 shared secret of the superuser.
    #[serde(default = "default_superuser_key")]
    pub superuser_key: String,

    /// Largest clock skew in seconds accepted on signed control requests.
    #[serde(default = "default_tsig_fudge")]
    pub tsig_fudge: u16,

    /// Idle timeout for TCP connections in seconds.
    #[serde(default = "default_tcp_timeout_secs")]
    pub tcp_timeout_secs: u64,

    /// Log every incoming query at info level.
    #[serde(default)]
    pub log_queries: bool,

    /// Require capability bits for `ZONE` control commands.
    #[serde(default)]
    pub enforce_capabilities: bool,

    /// Deadline for a `READXFR` zone transfer in seconds.
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
}

impl DnsConfig {
    /// TCP idle timeout.
    pub fn tcp_timeout(&self) -> Duration {
        Duration::from_secs(self.tcp_timeout_secs)
    }

    /// Zone transfer deadline.
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            superuser: default_superuser(),
            superuser_key: default_superuser_key(),
            tsig_fudge: default_tsig_fudge(),
            tcp_timeout_secs: default_tcp_timeout_secs(),
            log_queries: false,
            enforce_capabilities: false,
            transfer_timeout_secs: default_transfer_timeout_secs(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 1053))
}

fn default_superuser() -> String {
    "root".to_string()
}

fn default_superuser_key() -> String {
    "c3R1cGlk".to_string()
}

fn default_tsig_fudge() -> u16 {
    300
}

fn default_tcp_timeout_secs() -> u64 {
    30
}

fn default_transfer_timeout_secs() -> u64 {
    30
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "fksd=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,

    /// OpenTelemetry configuration.
    #[serde(default)]
    pub opentelemetry: Option<OpenTelemetryConfig>,
}

/// OpenTelemetry exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenTelemetryConfig {
    /// OTLP endpoint (e.g., "http://localhost:4317").
    pub endpoint: String,

    /// Service name for traces.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
            opentelemetry: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "fksd".to_string()
}
