//! Default configuration values
//!
//! Single source of truth for defaults, shared by the settings type and the
//! command line help.

use std::path::PathBuf;
use std::time::Duration;

use super::types::OverwritePolicy;

/// Environment variable prefix for all configuration options (`INSTALLCERTS_TIMEOUT_MS`, ...)
pub const ENV_PREFIX: &str = "INSTALLCERTS";

/// Configuration file picked up from the working directory when present
pub const DEFAULT_CONFIG_FILE: &str = "installcerts.json";

/// Default trust store password, same as the JDK's
pub const STORE_PASSWORD_STR: &str = "changeit";

/// Default log level as string
pub const LOG_LEVEL_STR: &str = "info";

/// Default connect and handshake timeout in milliseconds
pub const TIMEOUT_MS: u64 = 5_000;

/// Default store password
pub fn store_password() -> String {
    STORE_PASSWORD_STR.to_string()
}

/// Default log level
pub fn log_level() -> String {
    LOG_LEVEL_STR.to_string()
}

/// Default timeout in milliseconds
pub fn timeout_ms() -> u64 {
    TIMEOUT_MS
}

/// Default timeout
pub fn timeout() -> Duration {
    Duration::from_millis(TIMEOUT_MS)
}

/// Keystores are written to the working directory by default
pub fn output_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Ask before overwriting an existing keystore
pub fn overwrite() -> OverwritePolicy {
    OverwritePolicy::Prompt
}
