//! InstallCerts: incremental TLS trust store construction
//!
//! Connects to a TLS server, captures the certificate chain it presents and,
//! when the chain is not trusted yet, adds exactly the certificates needed to
//! make it validate. The result is written as a PKCS#12 keystore named after
//! the host.
//!
//! # Main Features
//!
//! - Recording trust validator wrapped around any trust decision
//! - Blocking handshake probe with separate connect and handshake timeouts
//! - Leaf-first chain extension that stops at the first trusted result
//! - PKCS#12 persistence with aliases kept as friendly names
//!
//! # Example
//!
//! ```no_run
//! use installcerts::config::Settings;
//! use installcerts::store::{system_ca_bundle, InstallOutcome, TrustStoreBuilder};
//! use installcerts::tls::TlsProbe;
//! use installcerts::{parse_target, Result};
//!
//! fn main() -> Result<()> {
//!     let settings = Settings::default();
//!     let target = parse_target("https://example.com")?;
//!     let base = system_ca_bundle()?;
//!
//!     let mut builder = TrustStoreBuilder::new(
//!         target,
//!         &settings,
//!         settings.probe_config(false, false),
//!         TlsProbe::new(),
//!     );
//!
//!     match builder.run(&base)? {
//!         InstallOutcome::Saved { path, aliases, .. } => {
//!             println!("added {:?} to {}", aliases, path.display())
//!         }
//!         outcome => println!("nothing to do for {} certificate(s)", outcome.chain().len()),
//!     }
//!     Ok(())
//! }
//! ```

// Public modules
pub mod common;
pub mod config;
pub mod store;
pub mod tls;

// Re-export commonly used structures and functions for convenience
pub use common::{parse_target, ConnectionTarget, InstallError, Result};
pub use store::{InstallOutcome, TrustStore, TrustStoreBuilder};
pub use tls::{Certificate, CertificateChain, TlsProbe};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
