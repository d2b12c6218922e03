// src/config.rs

//! Manages broker configuration: loading from TOML, defaults, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    8222
}

/// The validated broker configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Advertised in the INFO banner.
    #[serde(default = "default_server_name")]
    pub server_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// The largest PUB payload accepted, in bytes.
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
    /// The longest command line accepted, in bytes.
    #[serde(default = "default_max_control_line")]
    pub max_control_line: usize,
    /// Capacity of each client's outbound mailbox. A client whose mailbox is full
    /// when a message is routed to it is disconnected as a slow consumer.
    #[serde(default = "default_max_pending_frames")]
    pub max_pending_frames: usize,
    /// Interval between keepalive PINGs, e.g. "5s" or "1m 30s".
    #[serde(with = "humantime_serde", default = "default_ping_interval")]
    pub ping_interval: Duration,
    #[serde(default = "default_max_pings_outstanding")]
    pub max_pings_outstanding: u32,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    4222
}
fn default_server_name() -> String {
    "spinelmq".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    10000
}
fn default_max_payload() -> usize {
    1024 * 1024 // 1 MB
}
fn default_max_control_line() -> usize {
    4096
}
fn default_max_pending_frames() -> usize {
    8192
}
fn default_ping_interval() -> Duration {
    Duration::from_secs(5)
}
fn default_max_pings_outstanding() -> u32 {
    2
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            server_name: default_server_name(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            max_payload: default_max_payload(),
            max_control_line: default_max_control_line(),
            max_pending_frames: default_max_pending_frames(),
            ping_interval: default_ping_interval(),
            max_pings_outstanding: default_max_pings_outstanding(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid configuration in '{path}'"))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }
        if self.max_payload == 0 {
            return Err(anyhow!("max_payload cannot be 0"));
        }
        if self.max_control_line == 0 {
            return Err(anyhow!("max_control_line cannot be 0"));
        }
        if self.max_pending_frames == 0 {
            return Err(anyhow!("max_pending_frames cannot be 0"));
        }
        if self.ping_interval.is_zero() {
            return Err(anyhow!("ping_interval cannot be 0"));
        }
        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }

    /// Settings that are accepted but probably unintended. Loading happens
    /// before logging is set up, so the caller logs these.
    pub fn warnings(&self) -> Vec<&'static str> {
        let mut warnings = Vec::new();
        if self.max_pings_outstanding == 0 {
            warnings.push(
                "max_pings_outstanding is 0: a client is dropped at its first keepalive PING.",
            );
        }
        warnings
    }
}
