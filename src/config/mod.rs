//! Configuration module
//!
//! Settings of a run and the per-probe configuration derived from them.

pub mod defaults;
pub mod loader;
pub mod types;

pub use types::{BaseStore, OverwritePolicy, ProbeConfig, Settings};
