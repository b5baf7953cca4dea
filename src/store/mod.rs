//! Trust store module
//!
//! In-memory store, PKCS#12 persistence, base store loading and the
//! incremental builder.

pub mod builder;
pub mod pkcs12;
mod safebag;
pub mod system;
pub mod truststore;

pub use builder::{InstallOutcome, Phase, TrustStoreBuilder};
pub use system::{find_ca_bundle, load_base_store, system_ca_bundle, CaBundleLoader};
pub use truststore::{EntryKind, KeyProtection, StoreFormat, TrustStore, TrustStoreEntry};
