//! Logging helpers
//!
//! Thin wrapper around `env_logger` so the binaries share one setup.

/// Initialize the logging system
///
/// `RUST_LOG` wins over `level` when it is set.
///
/// # Parameters
///
/// * `level` - Log level (error, warn, info, debug, trace)
pub fn init_logger(level: &str) {
    let env = env_logger::Env::default()
        .filter_or("RUST_LOG", level);

    // A second initialization (tests, embedding) is not an error for us.
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .try_init();
}

/// Level to use for a run, `debug` when verbose output was requested
pub fn effective_level(level: &str, verbose: bool) -> &str {
    if verbose { "debug" } else { level }
}
