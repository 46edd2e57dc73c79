// src/config.rs

//! Manages server configuration: loading, resolving dynamic values, and validation.

use crate::core::state::{ConnectionSettings, OUTBUF_THROTTLE_SIZE, REQUEST_SWEEP_INTERVAL};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::time::Duration;
use tracing::warn;

/// The smallest accepted `max_line_length`; the handshake lines alone need
/// this much.
const MIN_LINE_LENGTH: usize = 64;

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
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
    9178
}

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum SizeConfig {
    Bytes(usize),
    String(String),
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_socket_path")]
    socket_path: String,
    #[serde(default = "default_socket_mode")]
    socket_mode: u32,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_max_clients")]
    max_clients: usize,
    #[serde(default = "default_max_line_length")]
    max_line_length: usize,
    #[serde(default = "default_output_throttle")]
    output_throttle: SizeConfig,
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    sweep_interval: Duration,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    request_timeout: Duration,
    #[serde(default)]
    verbose_debug: bool,
    #[serde(default = "default_mechanisms")]
    mechanisms: Vec<String>,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_socket_path() -> String {
    "authgate-client".to_string()
}
fn default_socket_mode() -> u32 {
    0o600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    1024
}
fn default_max_line_length() -> usize {
    8192
}
fn default_output_throttle() -> SizeConfig {
    SizeConfig::Bytes(OUTBUF_THROTTLE_SIZE)
}
fn default_sweep_interval() -> Duration {
    REQUEST_SWEEP_INTERVAL
}
fn default_request_timeout() -> Duration {
    Duration::from_secs(3 * 60)
}
fn default_mechanisms() -> Vec<String> {
    vec!["ANONYMOUS".to_string()]
}

/// Represents the final, validated, and resolved server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub socket_path: String,
    pub socket_mode: u32,
    pub log_level: String,
    pub max_clients: usize,
    pub max_line_length: usize,
    /// Output backlog in bytes at which a client stops being read.
    pub output_throttle: usize,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub verbose_debug: bool,
    pub mechanisms: Vec<String>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            socket_mode: default_socket_mode(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            max_line_length: default_max_line_length(),
            output_throttle: OUTBUF_THROTTLE_SIZE,
            sweep_interval: default_sweep_interval(),
            request_timeout: default_request_timeout(),
            verbose_debug: false,
            mechanisms: default_mechanisms(),
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
            .with_context(|| format!("Failed to load configuration from '{path}'"))
    }

    /// Parses, resolves and validates a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw_config: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;

        let config = Config {
            socket_path: raw_config.socket_path,
            socket_mode: raw_config.socket_mode,
            log_level: raw_config.log_level,
            max_clients: raw_config.max_clients,
            max_line_length: raw_config.max_line_length,
            output_throttle: resolve_size(raw_config.output_throttle)?,
            sweep_interval: raw_config.sweep_interval,
            request_timeout: raw_config.request_timeout,
            verbose_debug: raw_config.verbose_debug,
            mechanisms: raw_config.mechanisms,
            metrics: raw_config.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    /// The per-connection limits derived from this configuration.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            max_line_length: self.max_line_length,
            output_throttle: self.output_throttle,
            verbose_debug: self.verbose_debug,
        }
    }

    /// Validates the resolved configuration to ensure logical consistency.
    fn validate(&self) -> Result<()> {
        if self.socket_path.trim().is_empty() {
            return Err(anyhow!("socket_path cannot be empty"));
        }
        if self.socket_mode > 0o777 {
            return Err(anyhow!(
                "socket_mode {:o} is not a valid permission mode",
                self.socket_mode
            ));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }
        if self.max_line_length < MIN_LINE_LENGTH {
            return Err(anyhow!(
                "max_line_length must be at least {MIN_LINE_LENGTH} bytes"
            ));
        }
        if self.output_throttle < 3 {
            return Err(anyhow!("output_throttle must be at least 3 bytes"));
        }
        if self.output_throttle < self.max_line_length {
            warn!(
                "output_throttle ({} bytes) is smaller than max_line_length ({} bytes); clients will be throttled after a single reply.",
                self.output_throttle, self.max_line_length
            );
        }
        if self.sweep_interval.is_zero() {
            return Err(anyhow!("sweep_interval cannot be 0"));
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow!("request_timeout cannot be 0"));
        }

        if self.mechanisms.is_empty() {
            return Err(anyhow!("at least one mechanism must be enabled"));
        }
        let mut seen = HashSet::new();
        for name in &self.mechanisms {
            if !seen.insert(name.to_ascii_uppercase()) {
                return Err(anyhow!("mechanism '{name}' is listed more than once"));
            }
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(anyhow!("metrics.port cannot be 0"));
        }
        Ok(())
    }
}

/// Resolves a `SizeConfig` into bytes.
fn resolve_size(cfg: SizeConfig) -> Result<usize> {
    match cfg {
        SizeConfig::Bytes(b) => Ok(b),
        SizeConfig::String(s) => {
            let s_lower = s.trim().to_lowercase();
            if let Some(val_str) = s_lower.strip_suffix("mb") {
                parse_size_string(&s, val_str, 1024 * 1024)
            } else if let Some(val_str) = s_lower.strip_suffix('m') {
                parse_size_string(&s, val_str, 1024 * 1024)
            } else if let Some(val_str) = s_lower.strip_suffix("kb") {
                parse_size_string(&s, val_str, 1024)
            } else if let Some(val_str) = s_lower.strip_suffix('k') {
                parse_size_string(&s, val_str, 1024)
            } else if let Some(val_str) = s_lower.strip_suffix('b') {
                parse_size_string(&s, val_str, 1)
            } else {
                s_lower.parse().with_context(|| {
                    format!("Invalid size '{s}'. Must be a number (bytes) or have a unit (e.g., '50kb').")
                })
            }
        }
    }
}

/// Parses a string number with a unit (kb, mb) and applies a multiplier.
fn parse_size_string(original_str: &str, value_str: &str, multiplier: u64) -> Result<usize> {
    let value: u64 = value_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid number in size value: '{original_str}'"))?;
    let result_u64 = value.saturating_mul(multiplier);
    usize::try_from(result_u64)
        .map_err(|_| anyhow!("size value '{original_str}' is too large for this system"))
}
