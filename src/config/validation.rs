//! Configuration validation.

use crate::config::{Config, HealthCheckType};
use std::collections::HashSet;

/// Validate the configuration.
///
/// Checks for:
/// - At least one backend
/// - Unique backend URLs
/// - Backend URLs are plain `http` with a host
/// - Sensible retry bounds and probe timings
/// - HTTP health checks have paths
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing every problem found.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push("at least one backend must be defined".to_string());
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        let url = &backend.url;

        if !seen.insert(url.as_str()) {
            errors.push(format!("duplicate backend url: {}", url));
        }

        if url.scheme() != "http" {
            errors.push(format!(
                "backend {} uses unsupported scheme '{}', only http is supported",
                url,
                url.scheme()
            ));
        }

        if url.host_str().is_none() {
            errors.push(format!("backend {} has no host", url));
        }
    }

    if config.dispatch.max_attempts == 0 {
        errors.push("dispatch.max_attempts must be >= 1".to_string());
    }
    if config.dispatch.max_body_size == 0 {
        errors.push("dispatch.max_body_size must be greater than zero".to_string());
    }

    let hc = &config.health_check;
    if hc.check_type == HealthCheckType::Http && hc.path.is_none() {
        errors.push("HTTP health check configured but no path specified".to_string());
    }
    if hc.interval.is_zero() {
        errors.push("health_check.interval must be greater than zero".to_string());
    }
    if hc.timeout.is_zero() {
        errors.push("health_check.timeout must be greater than zero".to_string());
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use std::time::Duration;

    fn minimal_config() -> Config {
        Config {
            global: GlobalConfig::default(),
            listen: "127.0.0.1:3030".parse().unwrap(),
            backends: vec![BackendConfig {
                url: "http://127.0.0.1:9000".parse().unwrap(),
            }],
            health_check: HealthCheckConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&minimal_config()).is_ok());
    }

    #[test]
    fn test_no_backends() {
        let mut config = minimal_config();
        config.backends.clear();
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("at least one backend"));
    }

    #[test]
    fn test_duplicate_backend() {
        let mut config = minimal_config();
        config.backends.push(config.backends[0].clone());
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("duplicate backend url"));
    }

    #[test]
    fn test_unsupported_scheme() {
        let mut config = minimal_config();
        config.backends[0].url = "https://127.0.0.1:9000".parse().unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("unsupported scheme 'https'"));
    }

    #[test]
    fn test_missing_host() {
        let mut config = minimal_config();
        config.backends[0].url = "unix:/run/app.sock".parse().unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("has no host"));
    }

    #[test]
    fn test_zero_attempts() {
        let mut config = minimal_config();
        config.dispatch.max_attempts = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("max_attempts"));
    }

    #[test]
    fn test_zero_body_limit() {
        let mut config = minimal_config();
        config.dispatch.max_body_size = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("max_body_size"));
    }

    #[test]
    fn test_http_health_check_missing_path() {
        let mut config = minimal_config();
        config.health_check.check_type = HealthCheckType::Http;
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("no path specified"));

        config.health_check.path = Some("/health".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_probe_timings() {
        let mut config = minimal_config();
        config.health_check.interval = Duration::ZERO;
        config.health_check.timeout = Duration::ZERO;
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("interval"));
        assert!(err.contains("timeout"));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = minimal_config();
        config.global.log_level = "loud".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("invalid log level"));
    }
}
