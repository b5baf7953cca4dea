//! In-memory trust store
//!
//! Maps unique aliases to trusted certificates or private-key entries. The
//! builder owns one of these per run and clones it before every mutation.

use std::collections::BTreeMap;
use std::fmt;

use openssl::pkey::{PKey, Private};

use crate::common::{InstallError, Result};
use crate::tls::Certificate;

/// Encoding the store was loaded from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    /// PEM certificates, e.g. the platform CA bundle or a fresh store
    Pem,
    /// PKCS#12, the canonical format used for persistence
    Pkcs12,
}

/// Parameters protecting a private key once the store is persisted
#[derive(Clone, PartialEq, Eq)]
pub struct KeyProtection {
    password: String,
}

impl KeyProtection {
    pub fn new(password: impl Into<String>) -> Self {
        Self { password: password.into() }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for KeyProtection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyProtection").field("password", &"***").finish()
    }
}

/// Kind of a store entry
#[derive(Clone)]
pub enum EntryKind {
    /// A certificate trusted as an anchor
    TrustedCertificate,
    /// A private key with its certificate
    PrivateKey {
        key: PKey<Private>,
        protection: Option<KeyProtection>,
    },
}

impl fmt::Debug for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::TrustedCertificate => write!(f, "TrustedCertificate"),
            EntryKind::PrivateKey { protection, .. } => f
                .debug_struct("PrivateKey")
                .field("protection", protection)
                .finish_non_exhaustive(),
        }
    }
}

/// One alias of a [`TrustStore`]
#[derive(Debug, Clone)]
pub struct TrustStoreEntry {
    alias: String,
    certificate: Certificate,
    kind: EntryKind,
}

impl TrustStoreEntry {
    pub fn trusted(alias: impl Into<String>, certificate: Certificate) -> Self {
        Self {
            alias: alias.into(),
            certificate,
            kind: EntryKind::TrustedCertificate,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn kind(&self) -> &EntryKind {
        &self.kind
    }

    pub fn is_key_entry(&self) -> bool {
        matches!(self.kind, EntryKind::PrivateKey { .. })
    }

    /// Private key of a key entry
    pub fn private_key(&self) -> Option<&PKey<Private>> {
        match &self.kind {
            EntryKind::PrivateKey { key, .. } => Some(key),
            EntryKind::TrustedCertificate => None,
        }
    }

    /// Protection parameters of a key entry
    pub fn protection(&self) -> Option<&KeyProtection> {
        match &self.kind {
            EntryKind::PrivateKey { protection, .. } => protection.as_ref(),
            EntryKind::TrustedCertificate => None,
        }
    }
}

impl PartialEq for TrustStoreEntry {
    fn eq(&self, other: &Self) -> bool {
        if self.alias != other.alias || self.certificate != other.certificate {
            return false;
        }
        match (&self.kind, &other.kind) {
            (EntryKind::TrustedCertificate, EntryKind::TrustedCertificate) => true,
            (
                EntryKind::PrivateKey { key: a, protection: pa },
                EntryKind::PrivateKey { key: b, protection: pb },
            ) => a.public_eq(b) && pa == pb,
            _ => false,
        }
    }
}

/// Alias to entry mapping with unique aliases
#[derive(Debug, Clone, PartialEq)]
pub struct TrustStore {
    entries: BTreeMap<String, TrustStoreEntry>,
    format: StoreFormat,
}

impl Default for TrustStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::with_format(StoreFormat::Pem)
    }

    pub fn with_format(format: StoreFormat) -> Self {
        Self {
            entries: BTreeMap::new(),
            format,
        }
    }

    pub fn format(&self) -> StoreFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in alias order
    pub fn entries(&self) -> impl Iterator<Item = &TrustStoreEntry> {
        self.entries.values()
    }

    pub fn aliases(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn contains_alias(&self, alias: &str) -> bool {
        self.entries.contains_key(alias)
    }

    pub fn get(&self, alias: &str) -> Option<&TrustStoreEntry> {
        self.entries.get(alias)
    }

    /// Whether any entry holds `certificate`
    pub fn contains_certificate(&self, certificate: &Certificate) -> bool {
        self.entries.values().any(|e| e.certificate() == certificate)
    }

    /// Add or replace a trusted-certificate entry
    ///
    /// Replacing a key entry is refused so a private key is never dropped silently.
    pub fn set_certificate_entry(&mut self, alias: impl Into<String>, certificate: Certificate) -> Result<()> {
        let alias = alias.into();
        if alias.is_empty() {
            return Err(InstallError::Store("alias must not be empty".to_string()));
        }
        if self.entries.get(&alias).map_or(false, TrustStoreEntry::is_key_entry) {
            return Err(InstallError::Store(format!(
                "alias {} already holds a private key entry",
                alias
            )));
        }
        self.entries
            .insert(alias.clone(), TrustStoreEntry::trusted(alias, certificate));
        Ok(())
    }

    /// Add or replace a private-key entry
    pub fn set_key_entry(
        &mut self,
        alias: impl Into<String>,
        key: PKey<Private>,
        certificate: Certificate,
        protection: Option<KeyProtection>,
    ) -> Result<()> {
        let alias = alias.into();
        if alias.is_empty() {
            return Err(InstallError::Store("alias must not be empty".to_string()));
        }
        let entry = TrustStoreEntry {
            alias: alias.clone(),
            certificate,
            kind: EntryKind::PrivateKey { key, protection },
        };
        self.entries.insert(alias, entry);
        Ok(())
    }

    pub fn remove(&mut self, alias: &str) -> Option<TrustStoreEntry> {
        self.entries.remove(alias)
    }

    /// Copy of this store restricted to `aliases`; unknown aliases are an error
    pub fn subset<S: AsRef<str>>(&self, aliases: &[S]) -> Result<TrustStore> {
        let mut subset = TrustStore::with_format(self.format);
        for alias in aliases {
            let alias = alias.as_ref();
            let entry = self
                .entries
                .get(alias)
                .ok_or_else(|| InstallError::Store(format!("unknown alias {}", alias)))?;
            subset.entries.insert(alias.to_string(), entry.clone());
        }
        Ok(subset)
    }

    /// Convert to the canonical PKCS#12 form
    ///
    /// Every entry is copied. Key entries without protection get
    /// `key_password`; trusted certificates carry none. A store that is
    /// already canonical is returned unchanged.
    pub fn to_pkcs12(&self, key_password: &str) -> TrustStore {
        if self.format == StoreFormat::Pkcs12 {
            return self.clone();
        }

        let entries = self
            .entries
            .iter()
            .map(|(alias, entry)| {
                let kind = match &entry.kind {
                    EntryKind::TrustedCertificate => EntryKind::TrustedCertificate,
                    EntryKind::PrivateKey { key, protection } => EntryKind::PrivateKey {
                        key: key.clone(),
                        protection: Some(
                            protection
                                .clone()
                                .unwrap_or_else(|| KeyProtection::new(key_password)),
                        ),
                    },
                };
                let entry = TrustStoreEntry {
                    alias: alias.clone(),
                    certificate: entry.certificate.clone(),
                    kind,
                };
                (alias.clone(), entry)
            })
            .collect();

        TrustStore {
            entries,
            format: StoreFormat::Pkcs12,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::cert::test_certs::{issue, key, pki};

    #[test]
    fn test_set_and_get_entries() {
        let (root, intermediate, _) = pki("store.test");
        let mut store = TrustStore::new();
        store.set_certificate_entry("root", root.cert.clone()).unwrap();
        store.set_certificate_entry("intermediate", intermediate.cert).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.aliases(), vec!["intermediate", "root"]);
        assert!(store.contains_certificate(&root.cert));
        assert!(!store.get("root").unwrap().is_key_entry());
    }

    #[test]
    fn test_replacing_certificate_entry() {
        let (root, intermediate, _) = pki("store.test");
        let mut store = TrustStore::new();
        store.set_certificate_entry("a", root.cert).unwrap();
        store.set_certificate_entry("a", intermediate.cert.clone()).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().certificate(), &intermediate.cert);
    }

    #[test]
    fn test_key_entry_is_not_replaced_by_certificate() {
        let leaf = issue("key.test", None, false, 7);
        let mut store = TrustStore::new();
        store.set_key_entry("mykey", leaf.key.clone(), leaf.cert.clone(), None).unwrap();

        assert!(store.set_certificate_entry("mykey", leaf.cert).is_err());
        assert!(store.get("mykey").unwrap().is_key_entry());
    }

    #[test]
    fn test_empty_alias_rejected() {
        let (root, _, _) = pki("store.test");
        assert!(TrustStore::new().set_certificate_entry("", root.cert).is_err());
    }

    #[test]
    fn test_clone_isolates_mutations() {
        let (root, intermediate, _) = pki("store.test");
        let mut base = TrustStore::new();
        base.set_certificate_entry("root", root.cert).unwrap();

        let mut working = base.clone();
        working.set_certificate_entry("intermediate", intermediate.cert).unwrap();

        assert_eq!(base.len(), 1);
        assert_eq!(working.len(), 2);
    }

    #[test]
    fn test_subset() {
        let (root, intermediate, leaf) = pki("store.test");
        let mut store = TrustStore::new();
        store.set_certificate_entry("root", root.cert).unwrap();
        store.set_certificate_entry("intermediate", intermediate.cert).unwrap();
        store.set_certificate_entry("leaf", leaf.cert).unwrap();

        let subset = store.subset(&["leaf", "intermediate"]).unwrap();
        assert_eq!(subset.aliases(), vec!["intermediate", "leaf"]);
        assert!(store.subset(&["missing"]).is_err());
    }

    #[test]
    fn test_pkcs12_conversion_protects_keys_only() {
        let (root, _, _) = pki("store.test");
        let leaf = issue("key.test", None, false, 9);
        let mut store = TrustStore::new();
        store.set_certificate_entry("root", root.cert).unwrap();
        store.set_key_entry("mykey", leaf.key, leaf.cert, None).unwrap();

        let converted = store.to_pkcs12("secret");
        assert_eq!(converted.format(), StoreFormat::Pkcs12);
        assert_eq!(converted.aliases(), store.aliases());
        assert!(converted.get("root").unwrap().protection().is_none());
        assert_eq!(converted.get("mykey").unwrap().protection().unwrap().password(), "secret");
    }

    #[test]
    fn test_pkcs12_conversion_is_idempotent() {
        let (root, intermediate, _) = pki("store.test");
        let mut store = TrustStore::new();
        store.set_certificate_entry("root", root.cert).unwrap();
        store.set_certificate_entry("intermediate", intermediate.cert).unwrap();
        store.set_key_entry("mykey", key(), issue("k", None, false, 3).cert, None).unwrap();

        let once = store.to_pkcs12("changeit");
        let twice = once.to_pkcs12("other");
        assert_eq!(once, twice);
    }
}
