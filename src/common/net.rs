//! Network utility functions
//!
//! Parsing of the `<host>[:port]` / URL argument into a [`ConnectionTarget`].

use url::Url;

use super::error::{InstallError, Result};
use super::types::ConnectionTarget;

/// Port used when neither the argument nor the URL scheme names one
pub const DEFAULT_PORT: u16 = 443;

/// Parse a server argument
///
/// Accepts a URL (`https://host:8443/path`), `host:port`, a bare `host`,
/// or a bracketed IPv6 literal (`[::1]:443`). Missing or unparsable ports
/// fall back to the scheme default, then to [`DEFAULT_PORT`].
///
/// # Arguments
///
/// * `uri` - The server argument
pub fn parse_target(uri: &str) -> Result<ConnectionTarget> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(InstallError::Config("Server URL can't be empty!".to_string()));
    }

    if uri.contains("://") {
        let url = Url::parse(uri)
            .map_err(|e| InstallError::Config(format!("Invalid server URL {}: {}", uri, e)))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| InstallError::Config(format!("Server URL has no host: {}", uri)))?;
        let port = url.port_or_known_default().unwrap_or(DEFAULT_PORT);
        return Ok(ConnectionTarget::new(host.trim_matches(|c| c == '[' || c == ']'), port));
    }

    if let Some(rest) = uri.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| InstallError::Config(format!("Unterminated IPv6 literal: {}", uri)))?;
        let port = tail
            .strip_prefix(':')
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        return Ok(ConnectionTarget::new(host, port));
    }

    match uri.split_once(':') {
        Some((host, port)) if !port.contains(':') => {
            if host.is_empty() {
                return Err(InstallError::Config(format!("Server URL has no host: {}", uri)));
            }
            Ok(ConnectionTarget::new(host, port.parse().unwrap_or(DEFAULT_PORT)))
        }
        // Bare IPv6 literal without brackets
        Some(_) => Ok(ConnectionTarget::new(uri, DEFAULT_PORT)),
        None => Ok(ConnectionTarget::new(uri, DEFAULT_PORT)),
    }
}
