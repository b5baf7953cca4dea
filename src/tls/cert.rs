//! Certificate handling module
//!
//! Immutable certificate snapshots taken from peer data, issuer checks,
//! fingerprints and the human-readable summary printed for each chain entry.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Deref;
use std::path::Path;

use log::debug;
use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::x509::{X509, X509NameRef, X509Ref};

use crate::common::{read_file, InstallError, Result};

/// Snapshot of a certificate
///
/// All textual fields are derived once from the encoded certificate; the
/// issuer relationships (`signed_by`, `self_signed`) are computed on demand.
#[derive(Clone)]
pub struct Certificate {
    x509: X509,
    der: Vec<u8>,
    subject: String,
    issuer: String,
    serial: String,
    not_before: String,
    not_after: String,
    sha1: String,
    md5: String,
    sha256: String,
    subject_alt_names: Vec<String>,
}

impl Certificate {
    /// Take a snapshot of an OpenSSL certificate
    pub fn from_x509(x509: &X509Ref) -> Result<Self> {
        let der = x509.to_der()?;
        let serial = x509.serial_number().to_bn()?.to_hex_str()?.to_string();

        Ok(Self {
            subject: format_name(x509.subject_name()),
            issuer: format_name(x509.issuer_name()),
            serial,
            not_before: x509.not_before().to_string(),
            not_after: x509.not_after().to_string(),
            sha1: fingerprint(x509, MessageDigest::sha1())?,
            md5: fingerprint(x509, MessageDigest::md5())?,
            sha256: fingerprint(x509, MessageDigest::sha256())?,
            subject_alt_names: subject_alt_names(x509),
            x509: x509.to_owned(),
            der,
        })
    }

    /// Parse a DER-encoded certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let x509 = X509::from_der(der)
            .map_err(|e| InstallError::Certificate(format!("Failed to parse certificate: {}", e)))?;
        Self::from_x509(&x509)
    }

    /// Parse the first certificate of a PEM document
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let x509 = X509::from_pem(pem)
            .map_err(|e| InstallError::Certificate(format!("Failed to parse certificate: {}", e)))?;
        Self::from_x509(&x509)
    }

    /// Load a PEM certificate from disk
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_pem(&read_file(path)?)
    }

    /// Underlying OpenSSL certificate
    pub fn x509(&self) -> &X509Ref {
        &self.x509
    }

    /// DER encoding, the input of every fingerprint
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Serial number as uppercase hex
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn not_before(&self) -> &str {
        &self.not_before
    }

    pub fn not_after(&self) -> &str {
        &self.not_after
    }

    /// SHA-1 fingerprint, colon separated
    pub fn sha1_fingerprint(&self) -> &str {
        &self.sha1
    }

    /// MD5 fingerprint, colon separated
    pub fn md5_fingerprint(&self) -> &str {
        &self.md5
    }

    /// SHA-256 fingerprint, colon separated
    pub fn sha256_fingerprint(&self) -> &str {
        &self.sha256
    }

    /// Subject alternative names as `TYPE:value`
    pub fn subject_alt_names(&self) -> &[String] {
        &self.subject_alt_names
    }

    /// Whole days until `notAfter`, negative once expired
    pub fn days_until_expiry(&self) -> Option<i32> {
        let now = Asn1Time::days_from_now(0).ok()?;
        now.diff(self.x509.not_after()).ok().map(|diff| diff.days)
    }

    /// True if `issuer` issued and signed this certificate
    ///
    /// The issuer name must equal the candidate's subject name and the
    /// candidate's public key must verify the signature. Any verification
    /// fault counts as "not signed by".
    pub fn signed_by(&self, issuer: &Certificate) -> bool {
        if !names_equal(self.x509.issuer_name(), issuer.x509.subject_name()) {
            return false;
        }

        let key = match issuer.x509.public_key() {
            Ok(key) => key,
            Err(e) => {
                debug!("Unable to read public key of {}: {}", issuer.subject, e);
                return false;
            }
        };

        match self.x509.verify(&key) {
            Ok(verified) => verified,
            Err(e) => {
                debug!("Signature check of {} failed: {}", self.subject, e);
                false
            }
        }
    }

    /// True if the certificate verifies under its own key
    pub fn self_signed(&self) -> bool {
        self.signed_by(self)
    }

    /// Multi-line summary printed for each chain entry
    ///
    /// Depends on the certificate alone, so the same certificate always
    /// renders the same text.
    pub fn render(&self) -> String {
        format!(
            "Subject - {}\n  Issuer : {}\n  SHA1   : {}\n  MD5    : {}\n  SHA256 : {}\n  SAN    : [{}]\n  Expiry : {}",
            self.subject,
            self.issuer,
            self.sha1,
            self.md5,
            self.sha256,
            self.subject_alt_names.join(", "),
            self.not_after,
        )
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("sha1", &self.sha1)
            .finish()
    }
}

/// Certificates as presented by a peer, leaf first
///
/// The order is never changed after capture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateChain(Vec<Certificate>);

impl CertificateChain {
    pub fn new(certs: Vec<Certificate>) -> Self {
        Self(certs)
    }

    /// Snapshot every certificate of an OpenSSL stack, keeping its order
    pub fn from_x509s<'a, I>(certs: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a X509Ref>,
    {
        certs
            .into_iter()
            .map(Certificate::from_x509)
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    /// Parse every certificate of a PEM bundle, in file order
    pub fn from_pem_bundle(pem: &[u8]) -> Result<Self> {
        let stack = X509::stack_from_pem(pem)
            .map_err(|e| InstallError::Certificate(format!("Failed to parse PEM bundle: {}", e)))?;
        Self::from_x509s(stack.iter().map(|c| &**c))
    }

    /// Certificate identifying the server itself
    pub fn leaf(&self) -> Option<&Certificate> {
        self.0.first()
    }

    pub fn into_vec(self) -> Vec<Certificate> {
        self.0
    }
}

impl Deref for CertificateChain {
    type Target = [Certificate];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Certificate>> for CertificateChain {
    fn from(certs: Vec<Certificate>) -> Self {
        Self(certs)
    }
}

impl IntoIterator for CertificateChain {
    type Item = Certificate;
    type IntoIter = std::vec::IntoIter<Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a CertificateChain {
    type Item = &'a Certificate;
    type IntoIter = std::slice::Iter<'a, Certificate>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Render a distinguished name as `CN=..., O=...`
pub fn format_name(name: &X509NameRef) -> String {
    name.entries()
        .map(|entry| {
            let key = entry
                .object()
                .nid()
                .short_name()
                .map(str::to_string)
                .unwrap_or_else(|_| entry.object().to_string());
            let value = entry
                .data()
                .as_utf8()
                .map(|s| s.to_string())
                .unwrap_or_else(|_| hex(entry.data().as_slice(), ""));
            format!("{}={}", key, value)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Colon-separated uppercase digest of the DER encoding
pub fn fingerprint(x509: &X509Ref, digest: MessageDigest) -> Result<String> {
    let bytes = x509.digest(digest)?;
    Ok(hex(&bytes, ":"))
}

fn hex(bytes: &[u8], separator: &str) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<String>>()
        .join(separator)
}

/// Canonical name comparison; string encoding and case do not matter
fn names_equal(a: &X509NameRef, b: &X509NameRef) -> bool {
    matches!(a.try_cmp(b), Ok(Ordering::Equal))
}

fn subject_alt_names(x509: &X509Ref) -> Vec<String> {
    let names = match x509.subject_alt_names() {
        Some(names) => names,
        None => return Vec::new(),
    };

    names
        .iter()
        .filter_map(|name| {
            if let Some(dns) = name.dnsname() {
                Some(format!("DNS:{}", dns))
            } else if let Some(ip) = name.ipaddress() {
                Some(format!("IP:{}", format_ip(ip)))
            } else if let Some(email) = name.email() {
                Some(format!("EMAIL:{}", email))
            } else {
                name.uri().map(|uri| format!("URI:{}", uri))
            }
        })
        .collect()
}

fn format_ip(bytes: &[u8]) -> String {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = [bytes[0], bytes[1], bytes[2], bytes[3]];
            std::net::Ipv4Addr::from(octets).to_string()
        }
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            std::net::Ipv6Addr::from(octets).to_string()
        }
        _ => hex(bytes, ":"),
    }
}


#[cfg(test)]
mod tests {
    use super::test_certs::{issue, issue_named, pki};
    use super::*;
    use openssl::asn1::Asn1Type;
    use openssl::x509::X509NameBuilder;

    #[test]
    fn test_signed_by_follows_issuer_chain() {
        let (root, intermediate, leaf) = pki("server.test");

        assert!(leaf.cert.signed_by(&intermediate.cert));
        assert!(intermediate.cert.signed_by(&root.cert));
        assert!(!leaf.cert.signed_by(&root.cert));
        assert!(!root.cert.signed_by(&intermediate.cert));
    }

    #[test]
    fn test_signed_by_requires_name_match() {
        let (_, intermediate, leaf) = pki("server.test");
        // Same name as the real issuer, different key
        let impostor = issue("Test Intermediate CA", None, true, 9);
        assert!(!leaf.cert.signed_by(&impostor.cert));

        // Issuer name of `other` is not the leaf's subject
        let other = issue("Other", Some(&intermediate), false, 10);
        assert!(other.cert.signed_by(&intermediate.cert));
        assert!(!other.cert.signed_by(&leaf.cert));
    }

    #[test]
    fn test_signed_by_is_false_when_names_differ() {
        let (_, intermediate, _) = pki("server.test");
        let mut elsewhere = X509NameBuilder::new().unwrap();
        elsewhere.append_entry_by_text("CN", "Elsewhere CA").unwrap();
        let elsewhere = elsewhere.build();

        // The intermediate's key made the signature, but the issuer name is foreign
        let cert = issue_named("mismatch.test", &elsewhere, &intermediate, 12);
        let key = intermediate.cert.x509().public_key().unwrap();
        assert!(cert.cert.x509().verify(&key).unwrap());
        assert!(!cert.cert.signed_by(&intermediate.cert));
    }

    #[test]
    fn test_names_compare_canonically() {
        let mut printable = X509NameBuilder::new().unwrap();
        printable
            .append_entry_by_text_with_type("CN", "Test Intermediate CA", Asn1Type::PRINTABLESTRING)
            .unwrap();
        let printable = printable.build();

        let (_, intermediate, _) = pki("server.test");
        let utf8 = intermediate.cert.x509().subject_name();
        assert_ne!(printable.to_der().unwrap(), utf8.to_der().unwrap());
        assert!(names_equal(&printable, utf8));

        // Same name in another string type still chains to the issuer
        let cert = issue_named("printable.test", &printable, &intermediate, 13);
        assert!(cert.cert.signed_by(&intermediate.cert));
    }

    #[test]
    fn test_self_signed_matches_signed_by_self() {
        let (root, intermediate, leaf) = pki("server.test");
        for issued in [&root, &intermediate, &leaf] {
            assert_eq!(issued.cert.self_signed(), issued.cert.signed_by(&issued.cert));
        }
        assert!(root.cert.self_signed());
        assert!(!intermediate.cert.self_signed());
        assert!(!leaf.cert.self_signed());
    }

    #[test]
    fn test_fingerprints() {
        let (_, _, leaf) = pki("server.test");
        let cert = &leaf.cert;

        // 20, 16 and 32 byte digests
        assert_eq!(cert.sha1_fingerprint().split(':').count(), 20);
        assert_eq!(cert.md5_fingerprint().split(':').count(), 16);
        assert_eq!(cert.sha256_fingerprint().split(':').count(), 32);

        // Stable across re-parsing
        let reparsed = Certificate::from_der(cert.der()).unwrap();
        assert_eq!(reparsed.sha1_fingerprint(), cert.sha1_fingerprint());
        assert_eq!(reparsed, *cert);
    }

    #[test]
    fn test_render_is_deterministic() {
        let (_, _, leaf) = pki("server.test");
        let text = leaf.cert.render();

        assert_eq!(text, leaf.cert.render());
        assert!(text.starts_with("Subject - CN=server.test"));
        assert!(text.contains("Issuer : CN=Test Intermediate CA"));
        assert!(text.contains(leaf.cert.sha1_fingerprint()));
        assert!(text.contains("DNS:server.test"));
        assert!(text.contains("IP:127.0.0.1"));

        let expected = format!(
            "Subject - CN=server.test\n  Issuer : CN=Test Intermediate CA\n  SHA1   : {}\n  MD5    : {}\n  SHA256 : {}\n  SAN    : [DNS:server.test, IP:127.0.0.1]\n  Expiry : {}",
            leaf.cert.sha1_fingerprint(),
            leaf.cert.md5_fingerprint(),
            leaf.cert.sha256_fingerprint(),
            leaf.cert.not_after(),
        );
        assert_eq!(text, expected);
        // Re-parsed copies render identically
        assert_eq!(Certificate::from_der(leaf.cert.der()).unwrap().render(), expected);
    }

    #[test]
    fn test_chain_from_pem_bundle_keeps_order() {
        let (root, intermediate, leaf) = pki("server.test");
        let mut pem = Vec::new();
        for issued in [&leaf, &intermediate, &root] {
            pem.extend(issued.cert.x509().to_pem().unwrap());
        }

        let chain = CertificateChain::from_pem_bundle(&pem).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.leaf(), Some(&leaf.cert));
        assert_eq!(chain[2], root.cert);
    }

    #[test]
    fn test_from_der_rejects_garbage() {
        assert!(Certificate::from_der(b"not a certificate").is_err());
        assert!(Certificate::from_pem(b"-----BEGIN CERTIFICATE-----\n-----END CERTIFICATE-----\n").is_err());
    }
}
