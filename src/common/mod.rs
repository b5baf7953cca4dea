//! Common module
//!
//! This module contains shared types, errors, and utility functions used throughout the application.

pub mod error;
pub mod fs;
pub mod log;
pub mod net;
pub mod types;

// Re-export commonly used types and functions
pub use error::{InstallError, Result};
pub use fs::{check_file_exists, keystore_file_name, keystore_path, read_file};
pub use self::log::init_logger;
pub use net::parse_target;
pub use types::ConnectionTarget;
