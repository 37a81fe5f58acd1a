//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, periods, worker counts)
//! - Check CIDR syntax of trusted frontends
//! - Check cloud endpoint URLs when gclb is enabled
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FeedConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::IpAddr;

use url::Url;

use crate::config::schema::FeedConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const NGINX_LOG_LEVELS: &[&str] = &["debug", "info", "notice", "warn", "error", "crit", "alert", "emerg"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check that `value` looks like `<ip>/<prefix>`.
pub fn is_cidr(value: &str) -> bool {
    let Some((addr, prefix)) = value.split_once('/') else {
        return false;
    };
    let Ok(addr) = addr.parse::<IpAddr>() else {
        return false;
    };
    let max = if addr.is_ipv4() { 32 } else { 128 };
    prefix.parse::<u8>().map(|p| p <= max).unwrap_or(false)
}

/// Validate a parsed configuration.
pub fn validate_config(config: &FeedConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let nginx = &config.nginx;

    if nginx.ingress_port == 0 {
        errors.push(ValidationError::new("nginx.ingress_port", "must be non-zero"));
    }
    if nginx.health_port == 0 {
        errors.push(ValidationError::new("nginx.health_port", "must be non-zero"));
    }
    if nginx.ingress_port != 0 && nginx.ingress_port == nginx.health_port {
        errors.push(ValidationError::new(
            "nginx.health_port",
            "must differ from nginx.ingress_port",
        ));
    }
    if nginx.worker_processes == 0 {
        errors.push(ValidationError::new("nginx.worker_processes", "must be at least 1"));
    }
    if nginx.update_period_ms == 0 {
        errors.push(ValidationError::new("nginx.update_period_ms", "must be non-zero"));
    }
    if nginx.status_poll_interval_ms == 0 {
        errors.push(ValidationError::new("nginx.status_poll_interval_ms", "must be non-zero"));
    }
    if !NGINX_LOG_LEVELS.contains(&nginx.log_level.as_str()) {
        errors.push(ValidationError::new(
            "nginx.log_level",
            format!("unknown level {:?}", nginx.log_level),
        ));
    }
    for cidr in &nginx.trusted_frontends {
        if !is_cidr(cidr) {
            errors.push(ValidationError::new(
                "nginx.trusted_frontends",
                format!("{:?} is not a CIDR", cidr),
            ));
        }
    }

    if config.gclb.enabled {
        if config.gclb.instance_group_prefix.is_empty() {
            errors.push(ValidationError::new(
                "gclb.instance_group_prefix",
                "required when gclb is enabled",
            ));
        }
        if config.gclb.operation_timeout_ms == 0 {
            errors.push(ValidationError::new("gclb.operation_timeout_ms", "must be non-zero"));
        }
        for (field, value) in [
            ("gclb.metadata_url", &config.gclb.metadata_url),
            ("gclb.compute_url", &config.gclb.compute_url),
        ] {
            if let Err(e) = Url::parse(value) {
                errors.push(ValidationError::new(field, format!("{:?} is not a URL: {}", value, e)));
            }
        }
    }

    if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
        errors.push(ValidationError::new(
            "logging.level",
            format!("unknown level {:?}", config.logging.level),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
