//! Configuration types
//!
//! This module contains the main configuration types used throughout the application.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::common::{InstallError, Result};
use super::defaults;

/// Per-probe settings
///
/// Passed explicitly to every probe; nothing is read from global state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Bound for the TCP connect, and for the handshake unless overridden
    pub timeout: Duration,
    /// Bound for each read/write during the handshake
    pub handshake_timeout: Option<Duration>,
    /// Accept every chain and only record it
    pub capture_only: bool,
    /// Log verify callbacks and negotiated session details
    pub debug_tracing: bool,
}

impl ProbeConfig {
    pub fn connect_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout.unwrap_or(self.timeout)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: defaults::timeout(),
            handshake_timeout: None,
            capture_only: false,
            debug_tracing: false,
        }
    }
}

/// What to do when the keystore file already exists
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum OverwritePolicy {
    /// Ask for confirmation; declined when nobody can answer
    Prompt,
    /// Replace the file without asking
    Force,
    /// Refuse to replace the file
    Fail,
}

// Case-insensitive, like the other enum settings
impl<'de> Deserialize<'de> for OverwritePolicy {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        OverwritePolicy::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl Default for OverwritePolicy {
    fn default() -> Self {
        defaults::overwrite()
    }
}

impl fmt::Display for OverwritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prompt => write!(f, "prompt"),
            Self::Force => write!(f, "force"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

impl FromStr for OverwritePolicy {
    type Err = InstallError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "prompt" => Ok(Self::Prompt),
            "force" => Ok(Self::Force),
            "fail" => Ok(Self::Fail),
            _ => Err(InstallError::Config(format!(
                "Invalid overwrite policy: {}. Valid values are: prompt, force, fail",
                s
            ))),
        }
    }
}

/// Trust store the run starts from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseStore {
    /// Platform default CA bundle
    System,
    /// No anchors at all
    Empty,
    /// Existing PKCS#12 keystore
    Keystore(PathBuf),
}

impl fmt::Display for BaseStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system CA bundle"),
            Self::Empty => write!(f, "empty store"),
            Self::Keystore(path) => write!(f, "keystore {}", path.display()),
        }
    }
}

/// Effective settings of a run
///
/// Every field has a default so partial files and environments deserialize.
/// Passwords are neither serialized nor shown by `Debug`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Password protecting the written keystore
    #[serde(skip_serializing)]
    pub store_password: String,

    /// Connect timeout in milliseconds, also the handshake timeout by default
    pub timeout_ms: u64,

    /// Handshake read/write timeout in milliseconds
    pub handshake_timeout_ms: Option<u64>,

    /// Directory receiving `<host>.p12`
    pub output_dir: PathBuf,

    /// Start from an empty store instead of the system CA bundle
    pub empty_store: bool,

    /// Start from this PKCS#12 keystore instead of the system CA bundle
    pub keystore: Option<PathBuf>,

    /// Password of `keystore`, defaults to `store_password`
    #[serde(skip_serializing)]
    pub keystore_password: Option<String>,

    /// Persist the whole working store, not just the added certificates
    pub include_ca_bundle: bool,

    /// Behaviour when the output file exists
    pub overwrite: OverwritePolicy,

    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_password: defaults::store_password(),
            timeout_ms: defaults::timeout_ms(),
            handshake_timeout_ms: None,
            output_dir: defaults::output_dir(),
            empty_store: false,
            keystore: None,
            keystore_password: None,
            include_ca_bundle: false,
            overwrite: defaults::overwrite(),
            log_level: defaults::log_level(),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("store_password", &"***")
            .field("timeout_ms", &self.timeout_ms)
            .field("handshake_timeout_ms", &self.handshake_timeout_ms)
            .field("output_dir", &self.output_dir)
            .field("empty_store", &self.empty_store)
            .field("keystore", &self.keystore)
            .field("keystore_password", &self.keystore_password.as_ref().map(|_| "***"))
            .field("include_ca_bundle", &self.include_ca_bundle)
            .field("overwrite", &self.overwrite)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Settings {
    /// Probe settings for this run
    pub fn probe_config(&self, capture_only: bool, debug_tracing: bool) -> ProbeConfig {
        ProbeConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            handshake_timeout: self.handshake_timeout_ms.map(Duration::from_millis),
            capture_only,
            debug_tracing,
        }
    }

    /// Store the run starts from; an explicit keystore wins over `empty_store`
    pub fn base_store(&self) -> BaseStore {
        match (&self.keystore, self.empty_store) {
            (Some(path), _) => BaseStore::Keystore(path.clone()),
            (None, true) => BaseStore::Empty,
            (None, false) => BaseStore::System,
        }
    }

    /// Password used to open `keystore`
    pub fn keystore_password(&self) -> &str {
        self.keystore_password.as_deref().unwrap_or(&self.store_password)
    }

    /// Reject values the rest of the program cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(InstallError::Config("timeout_ms must be greater than zero".to_string()));
        }

        if self.handshake_timeout_ms == Some(0) {
            return Err(InstallError::Config(
                "handshake_timeout_ms must be greater than zero".to_string(),
            ));
        }

        check_password("store_password", &self.store_password)?;
        if let Some(password) = &self.keystore_password {
            check_password("keystore_password", password)?;
        }

        match self.log_level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(InstallError::Config(format!(
                    "Invalid log level: {}. Valid values are: error, warn, info, debug, trace",
                    self.log_level
                )))
            }
        }

        Ok(())
    }
}

fn check_password(name: &str, password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(InstallError::Config(format!("{} must not be empty", name)));
    }
    if password.contains('\0') {
        return Err(InstallError::Config(format!("{} must not contain NUL bytes", name)));
    }
    Ok(())
}
