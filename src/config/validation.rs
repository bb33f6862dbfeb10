//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, sizes > 0)
//! - Reject placeholder secrets outside dev mode
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BffConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{BffConfig, PLACEHOLDER_CSRF_SECRET};

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

/// Validate a deserialized configuration.
pub fn validate_config(config: &BffConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    // The upstream client speaks plain HTTP only.
    if config.api.scheme != "http" {
        errors.push(ValidationError::new("api.scheme", "must be http"));
    }

    if config.api.host.is_empty() {
        errors.push(ValidationError::new("api.host", "must not be empty"));
    }

    if config.api.image_host.is_empty() {
        errors.push(ValidationError::new("api.image_host", "must not be empty"));
    }

    if !config.api.path_prefix.is_empty() && !config.api.path_prefix.starts_with('/') {
        errors.push(ValidationError::new("api.path_prefix", "must start with '/'"));
    }

    if config.web.domain.is_empty() {
        errors.push(ValidationError::new("web.domain", "must not be empty"));
    }

    if config.auth.domain.is_empty() {
        errors.push(ValidationError::new("auth.domain", "must not be empty"));
    }

    if config.csrf.secret.is_empty() {
        errors.push(ValidationError::new("csrf.secret", "must not be empty"));
    } else if config.csrf.secret == PLACEHOLDER_CSRF_SECRET && !config.dev_mode {
        errors.push(ValidationError::new(
            "csrf.secret",
            "placeholder secret is only allowed with dev_mode",
        ));
    }

    if config.csrf.ttl_secs == 0 {
        errors.push(ValidationError::new("csrf.ttl_secs", "must be > 0"));
    }

    if config.timeouts.request_secs == 0 || config.timeouts.upstream_secs == 0 {
        errors.push(ValidationError::new("timeouts", "request and upstream timeouts must be > 0"));
    }

    if config.security.max_body_size == 0 || config.api.max_response_bytes == 0 {
        errors.push(ValidationError::new("security.max_body_size", "body limits must be > 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
