//! Startup orchestration.
//!
//! Config first, then templates, then the server. Binding and serving is
//! left to the caller so tests can use ephemeral ports.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::loader::{read_config, ConfigError};
use crate::config::validation::validate_config;
use crate::config::BffConfig;
use crate::error::StartupError;
use crate::http::BffServer;
use crate::templates::DirTemplates;

/// Read the configuration file, or fall back to defaults when none is given.
pub fn load(path: Option<&Path>, dev_mode: bool) -> Result<BffConfig, StartupError> {
    let mut config = match path {
        Some(path) => read_config(path)?,
        None => BffConfig::default(),
    };
    config.dev_mode |= dev_mode;

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load templates and build the server.
pub fn build_server(config: BffConfig) -> Result<BffServer, StartupError> {
    let dir = PathBuf::from(&config.templates.dir);
    let templates = DirTemplates::load(&dir, &config.templates.extension)?;
    BffServer::new(config, Arc::new(templates))
}
