// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for simbay-manager.

use std::path::PathBuf;
use std::time::Duration;

/// Parse an env var into a bool with a sensible default.
fn parse_env_bool(var: &str, default: bool) -> bool {
    std::env::var(var)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn parse_env_u64(var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(var) {
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue(var)),
        Err(_) => Ok(default),
    }
}

fn parse_env_u16(var: &'static str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(var) {
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue(var)),
        Err(_) => Ok(default),
    }
}

/// Manager configuration loaded from environment variables.
///
/// All values are pure data; changing a base port or `max_instances` only
/// affects containers created after the change. Already-running containers
/// keep their original port assignment until restarted.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of instance slots (0..max_instances).
    pub max_instances: u32,
    /// Simulator image reference.
    pub image: String,
    /// Base port for the per-instance HTTP/stream-client endpoint.
    pub http_port_base: u16,
    /// Base port for the per-instance streaming signal endpoint.
    pub signal_port_base: u16,
    /// Base port for the per-instance native streaming endpoint.
    pub native_port_base: u16,
    /// Memory limit per container (engine syntax, e.g. "8g").
    pub memory_limit: String,
    /// Shared memory size per container (engine syntax, e.g. "2g").
    pub shm_size: String,
    /// Whether containers get GPU passthrough.
    pub gpu_enabled: bool,
    /// Whether containers are launched with streaming enabled.
    pub streaming_enabled: bool,
    /// Grace period for a stopping container before the engine force-kills.
    pub stop_timeout: Duration,
    /// Engine-reported uptime after which the stream endpoints are presumed
    /// reachable. A convention, not a probe.
    pub stream_warmup: Duration,
    /// Base directory for per-slot cache mounts.
    pub data_dir: PathBuf,
}

impl Config {
    /// Load configuration from `SIMBAY_`-prefixed environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_instances = parse_env_u64("SIMBAY_MAX_INSTANCES", 4)? as u32;
        if max_instances == 0 {
            return Err(ConfigError::NoInstances);
        }

        let http_port_base = parse_env_u16("SIMBAY_HTTP_PORT_BASE", 8211)?;
        let signal_port_base = parse_env_u16("SIMBAY_SIGNAL_PORT_BASE", 8011)?;
        let native_port_base = parse_env_u16("SIMBAY_NATIVE_PORT_BASE", 8899)?;

        for (var, base) in [
            ("SIMBAY_HTTP_PORT_BASE", http_port_base),
            ("SIMBAY_SIGNAL_PORT_BASE", signal_port_base),
            ("SIMBAY_NATIVE_PORT_BASE", native_port_base),
        ] {
            if base as u32 + (max_instances - 1) > u16::MAX as u32 {
                return Err(ConfigError::PortRangeOverflow(var, max_instances));
            }
        }

        // Convert to absolute path for engine mounts
        let data_dir_raw =
            PathBuf::from(std::env::var("SIMBAY_DATA_DIR").unwrap_or_else(|_| ".data".to_string()));
        let data_dir = if data_dir_raw.is_absolute() {
            data_dir_raw
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&data_dir_raw))
                .unwrap_or(data_dir_raw)
        };

        Ok(Self {
            max_instances,
            image: std::env::var("SIMBAY_IMAGE")
                .unwrap_or_else(|_| "nvcr.io/nvidia/isaac-sim:5.1.0".to_string()),
            http_port_base,
            signal_port_base,
            native_port_base,
            memory_limit: std::env::var("SIMBAY_MEMORY_LIMIT").unwrap_or_else(|_| "8g".to_string()),
            shm_size: std::env::var("SIMBAY_SHM_SIZE").unwrap_or_else(|_| "2g".to_string()),
            gpu_enabled: parse_env_bool("SIMBAY_GPU_ENABLED", true),
            streaming_enabled: parse_env_bool("SIMBAY_STREAMING_ENABLED", true),
            stop_timeout: Duration::from_secs(parse_env_u64("SIMBAY_STOP_TIMEOUT_SECS", 10)?),
            stream_warmup: Duration::from_secs(parse_env_u64("SIMBAY_STREAM_WARMUP_SECS", 30)?),
            data_dir,
        })
    }
}

impl Default for Config {
    /// Built-in defaults, without reading the environment. Used by tests.
    fn default() -> Self {
        Self {
            max_instances: 4,
            image: "nvcr.io/nvidia/isaac-sim:5.1.0".to_string(),
            http_port_base: 8211,
            signal_port_base: 8011,
            native_port_base: 8899,
            memory_limit: "8g".to_string(),
            shm_size: "2g".to_string(),
            gpu_enabled: true,
            streaming_enabled: true,
            stop_timeout: Duration::from_secs(10),
            stream_warmup: Duration::from_secs(30),
            data_dir: PathBuf::from(".data"),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable holds a value that does not parse.
    #[error("Invalid value for {0}")]
    InvalidValue(&'static str),
    /// A port base plus the slot count exceeds the valid port range.
    #[error("{0} plus {1} instances exceeds port 65535")]
    PortRangeOverflow(&'static str, u32),
    /// The configured slot count is zero.
    #[error("SIMBAY_MAX_INSTANCES must be at least 1")]
    NoInstances,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.max_instances, 4);
        assert_eq!(config.http_port_base, 8211);
        assert_eq!(config.signal_port_base, 8011);
        assert_eq!(config.native_port_base, 8899);
        assert_eq!(config.memory_limit, "8g");
        assert_eq!(config.shm_size, "2g");
        assert!(config.gpu_enabled);
        assert!(config.streaming_enabled);
        assert_eq!(config.stop_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::PortRangeOverflow("SIMBAY_HTTP_PORT_BASE", 300);
        let msg = format!("{}", err);
        assert!(msg.contains("SIMBAY_HTTP_PORT_BASE"));
        assert!(msg.contains("300"));

        let msg = format!("{}", ConfigError::InvalidValue("SIMBAY_MAX_INSTANCES"));
        assert!(msg.contains("SIMBAY_MAX_INSTANCES"));
    }
}
