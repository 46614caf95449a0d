//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Check addresses and URLs are usable before anything is bound or dialed
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: &GatewayConfig → Result<(), Vec<ValidationError>>

use std::fmt;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::{GatewayConfig, TransportSettings};
use crate::transport::direct::validate_base_url;
use crate::transport::MAX_TIMEOUT;

/// A single semantic problem with the configuration.
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

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("{:?} is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than zero"));
    }

    check_http_url("upstream.base_url", &config.upstream.base_url, &mut errors);
    if config.upstream.timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.timeout_secs", "must be greater than zero"));
    } else if config.upstream.timeout_secs > MAX_TIMEOUT.as_secs() {
        errors.push(ValidationError::new(
            "upstream.timeout_secs",
            format!("must be at most {}", MAX_TIMEOUT.as_secs()),
        ));
    }

    if let TransportSettings::BusTunnel {
        address,
        port,
        subject_prefix,
    } = &config.upstream.transport
    {
        if address.trim().is_empty() {
            errors.push(ValidationError::new("upstream.transport.address", "must not be empty"));
        }
        if *port == 0 {
            errors.push(ValidationError::new("upstream.transport.port", "must not be zero"));
        }
        if let Err(message) = check_subject_prefix(subject_prefix) {
            errors.push(ValidationError::new("upstream.transport.subject_prefix", message));
        }
    }

    if config.shutdown.grace_period_ms == 0 {
        errors.push(ValidationError::new("shutdown.grace_period_ms", "must be greater than zero"));
    }

    if config.observability.log_level.parse::<tracing::Level>().is_err() {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level {:?}", config.observability.log_level),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", config.observability.metrics_address),
        ));
    }

    check_http_url("responder.backend_url", &config.responder.backend_url, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_http_url(field: &'static str, raw: &str, errors: &mut Vec<ValidationError>) {
    match Url::parse(raw) {
        Ok(url) => {
            if let Err(e) = validate_base_url(&url) {
                errors.push(ValidationError::new(field, e.to_string()));
            }
        }
        Err(e) => errors.push(ValidationError::new(field, format!("{raw:?}: {e}"))),
    }
}

fn check_subject_prefix(prefix: &str) -> Result<(), String> {
    if prefix.is_empty() {
        return Err("must not be empty".to_string());
    }
    if prefix.starts_with('.') || prefix.ends_with('.') || prefix.contains("..") {
        return Err(format!("{prefix:?} has an empty subject token"));
    }
    if prefix.chars().any(|c| c.is_whitespace() || c == '*' || c == '>') {
        return Err(format!("{prefix:?} contains whitespace or wildcards"));
    }
    Ok(())
}
