//! Configuration validation.

use crate::config::{Config, Role};
use crate::health::MAX_COOLDOWN;
use std::collections::HashSet;

/// Validate the configuration.
///
/// Checks for:
/// - A non-empty pool with unique, non-empty backend names
/// - `host:port` backend addresses
/// - Exactly one primary backend
/// - Sane failover thresholds, timeouts and retryable statuses
/// - Alerting parameters
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing every problem found.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.pool.is_empty() {
        errors.push("at least one backend must be defined in the pool".to_string());
    }

    let mut names = HashSet::new();
    for backend in &config.pool {
        if backend.name.is_empty() {
            errors.push("backend name cannot be empty".to_string());
        } else if !names.insert(backend.name.as_str()) {
            errors.push(format!("duplicate backend name: {}", backend.name));
        }

        if !is_host_port(&backend.address) {
            errors.push(format!(
                "backend '{}' has invalid address '{}' (expected host:port)",
                backend.name, backend.address
            ));
        }
    }

    let primaries = config
        .pool
        .iter()
        .filter(|b| b.role == Role::Primary)
        .count();
    if !config.pool.is_empty() && primaries != 1 {
        errors.push(format!(
            "pool must have exactly one primary backend, found {}",
            primaries
        ));
    }

    if config.proxy.max_body_size == 0 {
        errors.push("proxy max_body_size must be at least 1 byte".to_string());
    }

    let failover = &config.failover;
    if failover.failure_threshold == 0 {
        errors.push("failover failure_threshold must be >= 1".to_string());
    }
    if failover.cooldown > MAX_COOLDOWN {
        errors.push(format!(
            "failover cooldown must be at most {}",
            humantime::format_duration(MAX_COOLDOWN)
        ));
    }
    if failover.connect_timeout.is_zero() {
        errors.push("failover connect_timeout must be greater than zero".to_string());
    }
    if failover.response_timeout.is_zero() {
        errors.push("failover response_timeout must be greater than zero".to_string());
    }
    for status in &failover.retryable_statuses {
        if !(500..=599).contains(status) {
            errors.push(format!(
                "retryable status {} is not a 5xx status",
                status
            ));
        }
    }

    let alerts = &config.alerts;
    if alerts.window_size == 0 {
        errors.push("alerts window_size must be >= 1".to_string());
    }
    if !(0.0..=100.0).contains(&alerts.error_rate_threshold) {
        errors.push(format!(
            "alerts error_rate_threshold {} must be between 0 and 100",
            alerts.error_rate_threshold
        ));
    }
    if let Some(ref url) = alerts.slack_webhook_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(format!("alerts slack_webhook_url '{}' is not an http(s) URL", url));
        }
    }
    if let Some(ref pool) = alerts.active_pool {
        if !names.contains(pool.as_str()) {
            errors.push(format!(
                "alerts active_pool '{}' is not a backend in the pool",
                pool
            ));
        }
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

/// `host:port` with a non-empty host and a numeric port.
fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
