//! Error handling module
//!
//! This module defines the error types and result type aliases used in the application.

use thiserror::Error;
use std::io;

/// InstallCerts error type
#[derive(Error, Debug)]
pub enum InstallError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// OpenSSL error
    #[error("OpenSSL error: {0}")]
    Ssl(#[from] openssl::error::ErrorStack),

    /// Transport failure (resolve, connect, timeout, handshake) before any
    /// trust decision was made
    #[error("Network error ({target}): {message}")]
    Network {
        /// `host:port` of the probed server
        target: String,
        /// What went wrong
        message: String,
    },

    /// The handshake finished but no certificate chain was captured
    #[error("Could not obtain server certificate chain from {target}")]
    EmptyChain {
        /// `host:port` of the probed server
        target: String,
    },

    /// Every certificate of the chain was added and the server is still untrusted
    #[error("Server {target} is still untrusted after adding {added} certificate(s)")]
    ValidationExhausted {
        /// `host:port` of the probed server
        target: String,
        /// Number of certificates added before giving up
        added: usize,
    },

    /// Writing the trust store failed or overwriting was declined
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Certificate error
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Trust store error
    #[error("Trust store error: {0}")]
    Store(String),
}

impl InstallError {
    /// Build a network error for the given target
    pub fn network(target: impl ToString, message: impl ToString) -> Self {
        InstallError::Network {
            target: target.to_string(),
            message: message.to_string(),
        }
    }

    /// Process exit code for this kind of failure
    pub fn exit_code(&self) -> i32 {
        match self {
            InstallError::Network { .. } => 2,
            InstallError::EmptyChain { .. } => 3,
            InstallError::ValidationExhausted { .. } => 4,
            InstallError::Persistence(_) => 5,
            InstallError::Config(_) => 64,
            InstallError::Io(_)
            | InstallError::Ssl(_)
            | InstallError::Certificate(_)
            | InstallError::Store(_) => 1,
        }
    }
}

/// Result type alias
///
/// This is a `Result` type alias that uses our custom `InstallError`.
pub type Result<T> = std::result::Result<T, InstallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let err: InstallError = io_err.into();

        match err {
            InstallError::Io(_) => {}
            _ => panic!("Should convert to IO error"),
        }
    }

    #[test]
    fn test_error_display() {
        let err = InstallError::network("example.com:443", "connection refused");
        let err_str = format!("{}", err);
        assert!(err_str.contains("example.com:443"));
        assert!(err_str.contains("connection refused"));
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = [
            InstallError::network("h:1", "x"),
            InstallError::EmptyChain { target: "h:1".into() },
            InstallError::ValidationExhausted { target: "h:1".into(), added: 3 },
            InstallError::Persistence("x".into()),
            InstallError::Config("x".into()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(InstallError::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(codes.iter().all(|c| *c != 0));
    }
}
