//! PKCS#12 persistence
//!
//! Aliases survive a round trip as PKCS#12 friendly names. Certificate
//! entries are written as trusted certificate bags that the JDK keystore
//! lists as trust anchors; a key entry is written as a shrouded key bag
//! paired with its certificate through a local key id.

use std::ffi::CString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use openssl::hash::MessageDigest;
use openssl::pkcs12::Pkcs12;
use openssl::x509::X509;

use crate::common::{InstallError, Result};
use crate::config::OverwritePolicy;
use crate::tls::Certificate;
use super::safebag::{self, AuthSafes, SafeBags};
use super::truststore::{KeyProtection, StoreFormat, TrustStore};

/// Alias given to a key entry whose certificate carries none
pub const DEFAULT_KEY_ALIAS: &str = "mykey";

/// Copy of `cert` carrying `alias` as its auxiliary alias
fn aliased(cert: &Certificate, alias: &str) -> Result<X509> {
    let x509 = X509::from_der(cert.der())?;
    safebag::set_alias(&x509, alias)
        .map_err(|e| InstallError::Store(format!("unable to set alias {}: {}", alias, e)))?;
    Ok(x509)
}

/// Encode `store` as a password-protected PKCS#12 archive
///
/// # Parameters
/// * `store` - Entries to encode; converted to canonical form first
/// * `password` - Protects the archive and any key entry
///
/// # Returns
/// DER encoding of the archive
///
/// # Errors
/// Returns [`InstallError::Persistence`] for more than one key entry or a key
/// entry protected by a different password
pub fn encode(store: &TrustStore, password: &str) -> Result<Vec<u8>> {
    let store = store.to_pkcs12(password);
    let pass = CString::new(password)
        .map_err(|_| InstallError::Persistence("store password must not contain NUL bytes".to_string()))?;

    // Step 1: one bag per entry
    let mut certs = SafeBags::new();
    let mut keys = SafeBags::new();
    for entry in store.entries() {
        let cert = aliased(entry.certificate(), entry.alias())?;
        match entry.private_key() {
            Some(key) => {
                if !keys.is_empty() {
                    return Err(InstallError::Persistence(
                        "a PKCS#12 file can hold only one private key entry".to_string(),
                    ));
                }
                if entry.protection().map(KeyProtection::password) != Some(password) {
                    return Err(InstallError::Persistence(format!(
                        "key entry {} is protected with a password other than the store password",
                        entry.alias()
                    )));
                }
                let key_id = cert.digest(MessageDigest::sha1())?;
                certs.add_key_cert(&cert, &key_id)?;
                keys.add_key(key, entry.alias(), &key_id, &pass)?;
            }
            None => certs.add_trusted_cert(&cert)?,
        }
    }

    // Step 2: certificates in an encrypted safe, the shrouded key in a plain one
    let mut safes = AuthSafes::new();
    if !certs.is_empty() {
        safes.add_encrypted(&certs, &pass)?;
    }
    if !keys.is_empty() {
        safes.add_plain(&keys)?;
    }

    let der = safes.into_pkcs12(&pass)?.to_der()?;
    debug!("Encoded {} entries into {} bytes of PKCS#12", store.len(), der.len());
    Ok(der)
}

/// Decode a PKCS#12 archive into a canonical [`TrustStore`]
///
/// Certificates without a friendly name get `entry-<n>`; duplicate names get
/// a numeric suffix.
pub fn decode(der: &[u8], password: &str) -> Result<TrustStore> {
    let parsed = Pkcs12::from_der(der)?
        .parse2(password)
        .map_err(|e| InstallError::Store(format!("unable to open PKCS#12 store: {}", e)))?;

    let mut store = TrustStore::with_format(StoreFormat::Pkcs12);

    if let (Some(key), Some(cert)) = (parsed.pkey, parsed.cert.as_ref()) {
        let alias = alias_of(cert).unwrap_or_else(|| DEFAULT_KEY_ALIAS.to_string());
        store.set_key_entry(
            alias,
            key,
            Certificate::from_x509(cert)?,
            Some(KeyProtection::new(password)),
        )?;
    }

    if let Some(ca) = parsed.ca {
        for (index, cert) in ca.iter().enumerate() {
            let wanted = alias_of(cert).unwrap_or_else(|| format!("entry-{}", index + 1));
            let alias = unique_alias(&store, wanted);
            store.set_certificate_entry(alias, Certificate::from_x509(cert)?)?;
        }
    }

    Ok(store)
}

fn alias_of(cert: &openssl::x509::X509Ref) -> Option<String> {
    cert.alias()
        .map(|a| String::from_utf8_lossy(a).into_owned())
        .filter(|a| !a.is_empty())
}

fn unique_alias(store: &TrustStore, wanted: String) -> String {
    if !store.contains_alias(&wanted) {
        return wanted;
    }
    (2..)
        .map(|n| format!("{}-{}", wanted, n))
        .find(|candidate| !store.contains_alias(candidate))
        .unwrap_or(wanted)
}

/// Load a PKCS#12 keystore file
pub fn load(path: &Path, password: &str) -> Result<TrustStore> {
    let der = fs::read(path).map_err(|e| {
        InstallError::Store(format!("unable to read keystore {}: {}", path.display(), e))
    })?;
    let store = decode(&der, password)?;
    info!("Loaded {} entries from keystore {}", store.len(), path.display());
    Ok(store)
}

/// Decide whether `path` may be written under `policy`
///
/// `confirm` is asked only for [`OverwritePolicy::Prompt`] and only when the
/// file exists.
pub fn check_overwrite(
    path: &Path,
    policy: OverwritePolicy,
    confirm: &mut dyn FnMut(&Path) -> bool,
) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    match policy {
        OverwritePolicy::Force => {
            warn!("Overwriting existing keystore {}", path.display());
            Ok(())
        }
        OverwritePolicy::Fail => Err(InstallError::Persistence(format!(
            "{} already exists; use --force to overwrite it",
            path.display()
        ))),
        OverwritePolicy::Prompt => {
            if confirm(path) {
                Ok(())
            } else {
                Err(InstallError::Persistence(format!(
                    "overwriting {} was declined; use --force to overwrite it",
                    path.display()
                )))
            }
        }
    }
}

/// Write `store` to `path` as PKCS#12 protected by `password`
pub fn write(
    store: &TrustStore,
    path: &Path,
    password: &str,
    policy: OverwritePolicy,
    confirm: &mut dyn FnMut(&Path) -> bool,
) -> Result<PathBuf> {
    check_overwrite(path, policy, confirm)?;

    let der = encode(store, password)?;
    let persist = |der: &[u8]| -> std::io::Result<()> {
        let mut file = fs::File::create(path)?;
        file.write_all(der)?;
        file.sync_all()
    };
    persist(&der).map_err(|e| {
        InstallError::Persistence(format!("unable to write {}: {}", path.display(), e))
    })?;

    info!("Trust store with {} entries written to {}", store.len(), path.display());
    Ok(path.to_path_buf())
}
