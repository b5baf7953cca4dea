//! Configuration loader
//!
//! Layers, lowest priority first:
//! 1. Default values (serde defaults on [`Settings`])
//! 2. JSON configuration file (`installcerts.json` unless given explicitly)
//! 3. Environment variables prefixed with `INSTALLCERTS_`
//!
//! Command line arguments are applied on top by the binary.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use log::debug;

use crate::common::{InstallError, Result};
use super::defaults;
use super::types::Settings;

impl Settings {
    /// Load settings from the configuration file and the process environment
    ///
    /// An explicitly given file must exist; the default file is optional.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        load_from(config_file, None)
    }
}

/// Load settings, reading the environment from `env` instead of the process
/// when given
pub(crate) fn load_from(
    config_file: Option<&Path>,
    env: Option<HashMap<String, String>>,
) -> Result<Settings> {
    let (path, required) = match config_file {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(defaults::DEFAULT_CONFIG_FILE), false),
    };

    if required && !path.exists() {
        return Err(InstallError::Config(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let settings = Config::builder()
        .add_source(File::from(path.as_path()).format(FileFormat::Json).required(required))
        .add_source(
            Environment::with_prefix(defaults::ENV_PREFIX)
                .try_parsing(true)
                .source(env),
        )
        .build()
        .and_then(|cfg| cfg.try_deserialize::<Settings>())
        .map_err(|e| InstallError::Config(e.to_string()))?;

    if path.exists() {
        debug!("Configuration loaded from {}", path.display());
    }

    Ok(settings)
}
