//! Startup errors.

use axum::http::uri::InvalidUri;
use thiserror::Error;

use crate::config::loader::ConfigError;
use crate::templates::TemplateError;

/// Anything that stops the process from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid upstream address: {0}")]
    Upstream(#[from] InvalidUri),

    #[error("invalid device pattern: {0}")]
    DevicePattern(#[from] regex::Error),

    #[error("invalid csrf secret: {0}")]
    CsrfSecret(#[from] hmac::digest::InvalidLength),

    #[error("template error: {0}")]
    Templates(#[from] TemplateError),

    #[error("invalid address '{0}'")]
    Address(String),

    #[error("failed to install metrics exporter: {0}")]
    Metrics(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
