//! Shared types module
//!
//! This module contains shared data types used throughout the application.

use std::fmt;

/// Server to probe, immutable for the duration of a run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionTarget {
    /// Host name or IP literal
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl ConnectionTarget {
    /// Create a new target
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Alias under which the chain certificate at `index` is stored
    pub fn alias_for(&self, index: usize) -> String {
        format!("{}-{}", self.host, index + 1)
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            // IPv6 literal
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_is_one_based() {
        let target = ConnectionTarget::new("example.com", 443);
        assert_eq!(target.alias_for(0), "example.com-1");
        assert_eq!(target.alias_for(2), "example.com-3");
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionTarget::new("example.com", 8443).to_string(), "example.com:8443");
        assert_eq!(ConnectionTarget::new("::1", 443).to_string(), "[::1]:443");
    }
}
