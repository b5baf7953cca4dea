//! Platform CA bundle and base store loading
//!
//! The system bundle is read through an explicitly passed [`CaBundleLoader`]
//! so callers and tests decide where anchors come from.

use std::env;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::X509;

use crate::common::{read_file, InstallError, Result};
use crate::config::BaseStore;
use crate::tls::Certificate;
use super::pkcs12;
use super::truststore::TrustStore;

/// Produces the base trust store for [`BaseStore::System`]
pub type CaBundleLoader = fn() -> Result<TrustStore>;

/// Environment variable overriding the bundle location, as OpenSSL honours it
pub const CA_FILE_ENV: &str = "SSL_CERT_FILE";

/// Well-known CA bundle locations, first match wins
pub const CA_BUNDLE_PATHS: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/ca-bundle.pem",
    "/etc/pki/ca-trust/extracted/pem/tls-ca-bundle.pem",
    "/etc/ssl/cert.pem",
    "/usr/local/etc/openssl/cert.pem",
];

/// Locate the platform CA bundle file
pub fn find_ca_bundle() -> Option<PathBuf> {
    if let Ok(path) = env::var(CA_FILE_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Some(path);
        }
        warn!("{} points to {}, which is not a file", CA_FILE_ENV, path.display());
    }

    CA_BUNDLE_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

/// Alias of a bundle certificate, stable across runs
pub fn bundle_alias(cert: &Certificate) -> String {
    let hex: String = cert
        .sha256_fingerprint()
        .chars()
        .filter(|c| *c != ':')
        .take(16)
        .collect();
    format!("system-{}", hex.to_lowercase())
}

/// Build a store holding every certificate of a PEM bundle
pub fn load_pem_bundle(path: &Path) -> Result<TrustStore> {
    let pem = read_file(path)?;
    let certs = X509::stack_from_pem(&pem)
        .map_err(|e| InstallError::Store(format!("invalid PEM bundle {}: {}", path.display(), e)))?;
    store_from_x509s(&certs)
}

fn store_from_x509s(certs: &[X509]) -> Result<TrustStore> {
    let mut store = TrustStore::new();
    for x509 in certs {
        let cert = Certificate::from_x509(x509)?;
        let alias = bundle_alias(&cert);
        if !store.contains_alias(&alias) {
            store.set_certificate_entry(alias, cert)?;
        }
    }
    Ok(store)
}

/// Default [`CaBundleLoader`]: the platform CA bundle
///
/// Falls back to OpenSSL's compiled-in default paths when no known bundle
/// file exists.
pub fn system_ca_bundle() -> Result<TrustStore> {
    if let Some(path) = find_ca_bundle() {
        let store = load_pem_bundle(&path)?;
        info!("Loaded {} CA certificates from {}", store.len(), path.display());
        return Ok(store);
    }

    debug!("No CA bundle file found, using OpenSSL default paths");
    let mut builder = X509StoreBuilder::new()?;
    builder.set_default_paths()?;
    let certs: Vec<X509> = builder
        .build()
        .all_certificates()
        .iter()
        .map(|c| c.to_owned())
        .collect();
    let store = store_from_x509s(&certs)?;
    info!("Loaded {} CA certificates from OpenSSL default paths", store.len());
    Ok(store)
}

/// Loader yielding an empty store, the base of `--empty-store` runs
pub fn empty_bundle() -> Result<TrustStore> {
    Ok(TrustStore::new())
}

/// Load the store a run starts from
pub fn load_base_store(base: &BaseStore, keystore_password: &str, loader: CaBundleLoader) -> Result<TrustStore> {
    match base {
        BaseStore::System => loader(),
        BaseStore::Empty => {
            info!("Starting from an empty trust store");
            empty_bundle()
        }
        BaseStore::Keystore(path) => pkcs12::load(path, keystore_password),
    }
}
