//! Configuration data types.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Inbound listener settings
    pub proxy: ProxyConfig,

    /// Backends in preference order (exactly one primary)
    #[serde(default)]
    pub pool: Vec<BackendConfig>,

    /// Health tracking and retry behaviour
    #[serde(default)]
    pub failover: FailoverConfig,

    /// Failover and error-rate alerting
    #[serde(default)]
    pub alerts: AlertConfig,
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json, pretty or compact
    #[serde(default)]
    pub log_format: LogFormat,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::Json,
            metrics: MetricsConfig::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
    Compact,
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether metrics endpoint is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address to bind metrics server
    #[serde(default = "default_metrics_address")]
    pub address: SocketAddr,

    /// Path for metrics endpoint
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_metrics_address(),
            path: default_metrics_path(),
        }
    }
}

/// Inbound listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Address and port to listen on
    pub listen: SocketAddr,

    /// Largest request body buffered for replay, in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

/// A backend in the pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique identifier, e.g. "blue" or "green"
    pub name: String,

    /// `host:port` of the backend; host names are resolved per connection
    pub address: String,

    /// Preference role
    #[serde(default)]
    pub role: Role,
}

/// Preference role of a backend.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    #[default]
    Secondary,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when every backend is DOWN.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AllDownPolicy {
    /// Attempt the whole pool in preference order anyway.
    #[default]
    FailOpen,
    /// Answer 503 without contacting any backend.
    FailFast,
}

/// Health tracking and retry settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FailoverConfig {
    /// Consecutive qualifying failures before a backend is marked DOWN
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long a backend stays DOWN
    #[serde(default = "default_cooldown", with = "humantime_serde")]
    pub cooldown: Duration,

    /// Per-attempt TCP connect bound
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Per-attempt bound on receiving the complete response
    #[serde(default = "default_response_timeout", with = "humantime_serde")]
    pub response_timeout: Duration,

    /// Upstream statuses that count as failures and trigger a retry
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,

    /// Behaviour when no backend is UP
    #[serde(default)]
    pub all_down: AllDownPolicy,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown: default_cooldown(),
            connect_timeout: default_connect_timeout(),
            response_timeout: default_response_timeout(),
            retryable_statuses: default_retryable_statuses(),
            all_down: AllDownPolicy::FailOpen,
        }
    }
}

/// Alerting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertConfig {
    /// Whether the alert watcher runs at all
    #[serde(default)]
    pub enabled: bool,

    /// Slack incoming webhook; alerts are only logged when unset
    #[serde(default)]
    pub slack_webhook_url: Option<String>,

    /// Error rate in percent above which an alert fires
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,

    /// Number of requests in the sliding error window
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Minimum time between two delivered alerts
    #[serde(default = "default_alert_cooldown", with = "humantime_serde")]
    pub cooldown: Duration,

    /// Pool expected to be serving at startup (defaults to the primary)
    #[serde(default)]
    pub active_pool: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            slack_webhook_url: None,
            error_rate_threshold: default_error_rate_threshold(),
            window_size: default_window_size(),
            cooldown: default_alert_cooldown(),
            active_pool: None,
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

fn default_failure_threshold() -> u32 {
    2
}

fn default_cooldown() -> Duration {
    Duration::from_secs(10)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_response_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_retryable_statuses() -> Vec<u16> {
    vec![500, 502, 503, 504]
}

fn default_error_rate_threshold() -> f64 {
    2.0
}

fn default_window_size() -> usize {
    200
}

fn default_alert_cooldown() -> Duration {
    Duration::from_secs(300)
}

/// Serde adapter for humantime durations ("10s", "250ms").
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
