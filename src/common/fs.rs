//! File system helpers
//!
//! Reading certificate material and naming the persisted keystore.

use std::fs;
use std::path::{Path, PathBuf};

use super::error::{InstallError, Result};

/// Extension of the persisted keystore
pub const KEYSTORE_EXTENSION: &str = "p12";

/// Check that a path exists and is a regular file
///
/// # Parameters
///
/// * `path` - File path
pub fn check_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(InstallError::Config(format!(
            "File does not exist: {}",
            path.display()
        )));
    }

    if !path.is_file() {
        return Err(InstallError::Config(format!(
            "Path is not a file: {}",
            path.display()
        )));
    }

    Ok(())
}

/// Read a whole file
///
/// # Parameters
///
/// * `path` - File path
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    check_file_exists(path)?;

    fs::read(path).map_err(InstallError::Io)
}

/// File name of the keystore written for `host`
///
/// Every character that is not ASCII alphanumeric becomes `_`, so
/// `example.com` maps to `example_com.p12`.
pub fn keystore_file_name(host: &str) -> String {
    let stem: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}.{}", stem, KEYSTORE_EXTENSION)
}

/// Full path of the keystore written for `host` inside `dir`
pub fn keystore_path(dir: &Path, host: &str) -> PathBuf {
    dir.join(keystore_file_name(host))
}
