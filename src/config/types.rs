//! Configuration data types.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Address the load balancer listens on
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Upstream servers, in rotation order
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    /// Periodic liveness probing
    #[serde(default)]
    pub health_check: HealthCheckConfig,

    /// Retry and attempt bounds for forwarding
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// A single upstream server.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct BackendConfig {
    /// Base URL requests are forwarded to
    pub url: Url,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    /// Type of health check: tcp or http
    #[serde(default, rename = "type")]
    pub check_type: HealthCheckType,

    /// HTTP path to check (for HTTP health checks)
    #[serde(default)]
    pub path: Option<String>,

    /// Expected HTTP status code (for HTTP health checks)
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,

    /// How often every backend is probed
    #[serde(default = "default_health_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Bound on a single probe
    #[serde(default = "default_health_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            check_type: HealthCheckType::Tcp,
            path: None,
            expected_status: default_expected_status(),
            interval: default_health_interval(),
            timeout: default_health_timeout(),
        }
    }
}

/// Type of health check.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckType {
    #[default]
    Tcp,
    Http,
}

/// Forwarding retry settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// Logical dispatches of one request before it is rejected
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Retries against the same backend before it is demoted
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Pause between retries against the same backend
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,

    /// Timeout for opening a connection to a backend
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Largest request body, in bytes, accepted for forwarding
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            connect_timeout: default_connect_timeout(),
            max_body_size: default_max_body_size(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT))
}

fn default_health_interval() -> Duration {
    Duration::from_secs(20)
}

fn default_health_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_expected_status() -> u16 {
    200
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(10)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024
}

/// Port used when none is given on the command line.
pub const DEFAULT_PORT: u16 = 3030;

/// Custom serde module for humantime durations.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
