//! Certificate trust decisions
//!
//! [`TrustValidator`] is the capability "decide whether this chain is
//! acceptable". [`StoreValidator`] answers it from a [`TrustStore`] using
//! OpenSSL path validation, and [`InterceptingValidator`] wraps any other
//! validator to record the chain it was asked about.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;

use log::debug;
use openssl::error::ErrorStack;
use openssl::stack::Stack;
use openssl::x509::store::{X509Store, X509StoreBuilder};
use openssl::x509::verify::X509VerifyFlags;
use openssl::x509::{X509, X509StoreContext};
use thiserror::Error;

use crate::common::Result;
use crate::store::TrustStore;
use super::cert::{Certificate, CertificateChain};

/// Why a chain was not accepted
#[derive(Error, Debug)]
pub enum TrustError {
    /// Path validation failed
    #[error("certificate chain rejected at depth {depth}: {reason}")]
    Rejected {
        /// Chain position of the offending certificate
        depth: u32,
        /// OpenSSL verify result
        reason: String,
    },

    /// Nothing to validate
    #[error("peer presented an empty certificate chain")]
    EmptyChain,

    /// A revocation hook refused a certificate
    #[error("certificate {subject} is revoked: {reason}")]
    Revoked {
        subject: String,
        reason: String,
    },

    /// OpenSSL failed while setting up validation
    #[error("validation setup failed: {0}")]
    Ssl(#[from] ErrorStack),
}

/// Which side of the handshake presented the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainDirection {
    /// Chain sent by the server to us
    Server,
    /// Chain sent by a client to a server
    Client,
}

impl fmt::Display for ChainDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainDirection::Server => write!(f, "server"),
            ChainDirection::Client => write!(f, "client"),
        }
    }
}

/// Certificate trust decision
pub trait TrustValidator {
    /// Decide on a chain presented by a server
    ///
    /// # Parameters
    /// * `chain` - Certificates as sent, leaf first
    /// * `auth_type` - Negotiated authentication, e.g. the cipher
    ///
    /// # Errors
    /// Returns a [`TrustError`] describing why the chain is not acceptable
    fn check_server_trusted(&self, chain: &CertificateChain, auth_type: &str) -> std::result::Result<(), TrustError>;

    /// Decide on a chain presented by a client
    fn check_client_trusted(&self, chain: &CertificateChain, auth_type: &str) -> std::result::Result<(), TrustError>;

    /// Dispatch on `direction`
    fn check_trusted(
        &self,
        chain: &CertificateChain,
        auth_type: &str,
        direction: ChainDirection,
    ) -> std::result::Result<(), TrustError> {
        match direction {
            ChainDirection::Server => self.check_server_trusted(chain, auth_type),
            ChainDirection::Client => self.check_client_trusted(chain, auth_type),
        }
    }
}

impl<V: TrustValidator + ?Sized> TrustValidator for Box<V> {
    fn check_server_trusted(&self, chain: &CertificateChain, auth_type: &str) -> std::result::Result<(), TrustError> {
        (**self).check_server_trusted(chain, auth_type)
    }

    fn check_client_trusted(&self, chain: &CertificateChain, auth_type: &str) -> std::result::Result<(), TrustError> {
        (**self).check_client_trusted(chain, auth_type)
    }
}

impl<V: TrustValidator + ?Sized> TrustValidator for &V {
    fn check_server_trusted(&self, chain: &CertificateChain, auth_type: &str) -> std::result::Result<(), TrustError> {
        (**self).check_server_trusted(chain, auth_type)
    }

    fn check_client_trusted(&self, chain: &CertificateChain, auth_type: &str) -> std::result::Result<(), TrustError> {
        (**self).check_client_trusted(chain, auth_type)
    }
}

/// Decorator that records every chain it is asked about
///
/// One instance belongs to exactly one handshake attempt. Each call replaces
/// the recorded chain; when no call happened the recorded chain is empty.
/// In capture-only mode the delegate is still consulted (its verdict is kept
/// in [`delegate_verdict`](Self::delegate_verdict)) but the chain is always
/// accepted.
pub struct InterceptingValidator<V> {
    delegate: V,
    capture_only: bool,
    chain: RefCell<CertificateChain>,
    last_call: RefCell<Option<(ChainDirection, std::result::Result<(), String>)>>,
}

impl<V: TrustValidator> InterceptingValidator<V> {
    /// Record, then pass the delegate's decision through unchanged
    pub fn new(delegate: V) -> Self {
        Self::with_mode(delegate, false)
    }

    /// Record, then accept whatever the delegate says
    pub fn capture_only(delegate: V) -> Self {
        Self::with_mode(delegate, true)
    }

    pub fn with_mode(delegate: V, capture_only: bool) -> Self {
        Self {
            delegate,
            capture_only,
            chain: RefCell::new(CertificateChain::default()),
            last_call: RefCell::new(None),
        }
    }

    pub fn is_capture_only(&self) -> bool {
        self.capture_only
    }

    /// Chain recorded by the most recent call, empty if there was none
    pub fn chain(&self) -> CertificateChain {
        self.chain.borrow().clone()
    }

    /// True once at least one validation call happened
    pub fn was_called(&self) -> bool {
        self.last_call.borrow().is_some()
    }

    /// Direction of the most recent call
    pub fn last_direction(&self) -> Option<ChainDirection> {
        self.last_call.borrow().as_ref().map(|(direction, _)| *direction)
    }

    /// What the delegate decided on the most recent call
    ///
    /// `Err` carries the rejection message. Differs from the returned
    /// verdict only in capture-only mode.
    pub fn delegate_verdict(&self) -> Option<std::result::Result<(), String>> {
        self.last_call.borrow().as_ref().map(|(_, verdict)| verdict.clone())
    }

    /// Forget anything recorded so the instance can serve a new attempt
    pub fn clear(&self) {
        *self.chain.borrow_mut() = CertificateChain::default();
        *self.last_call.borrow_mut() = None;
    }

    pub fn delegate(&self) -> &V {
        &self.delegate
    }

    pub fn into_inner(self) -> V {
        self.delegate
    }

    fn intercept(
        &self,
        chain: &CertificateChain,
        auth_type: &str,
        direction: ChainDirection,
    ) -> std::result::Result<(), TrustError> {
        // Step 1: record the chain exactly as presented
        *self.chain.borrow_mut() = chain.clone();

        // Step 2: the delegate decides, its verdict is kept either way
        let verdict = self.delegate.check_trusted(chain, auth_type, direction);
        debug!(
            "Captured {} certificate(s) from {} ({}): {}",
            chain.len(),
            direction,
            auth_type,
            match &verdict {
                Ok(()) => "accepted".to_string(),
                Err(e) => e.to_string(),
            }
        );
        *self.last_call.borrow_mut() = Some((direction, verdict.as_ref().map(|_| ()).map_err(|e| e.to_string())));

        // Step 3: capture-only mode lets every chain through
        if self.capture_only {
            Ok(())
        } else {
            verdict
        }
    }
}

impl<V: TrustValidator> TrustValidator for InterceptingValidator<V> {
    fn check_server_trusted(&self, chain: &CertificateChain, auth_type: &str) -> std::result::Result<(), TrustError> {
        self.intercept(chain, auth_type, ChainDirection::Server)
    }

    fn check_client_trusted(&self, chain: &CertificateChain, auth_type: &str) -> std::result::Result<(), TrustError> {
        self.intercept(chain, auth_type, ChainDirection::Client)
    }
}

/// Hook consulted for every chain certificate after path validation
///
/// No revocation source ships with the crate; callers plug in CRL or OCSP
/// lookups here.
pub trait RevocationCheck {
    /// `issuer` is the next certificate of the presented chain, if any
    fn check(&self, cert: &Certificate, issuer: Option<&Certificate>) -> std::result::Result<(), TrustError>;
}

/// Validator whose anchors are the entries of a [`TrustStore`]
///
/// Every stored certificate is an anchor, including non-self-signed ones
/// (OpenSSL `PARTIAL_CHAIN`), which is how keystore-based trust behaves.
/// A presented certificate that is itself stored ends path building there,
/// so an unrelated anchor sharing an issuer's name cannot shadow it.
pub struct StoreValidator {
    store: X509Store,
    fingerprints: HashSet<String>,
    revocation: Option<Box<dyn RevocationCheck>>,
}

impl StoreValidator {
    /// Build a validator from the certificates of `store`
    ///
    /// # Parameters
    /// * `store` - Trust store whose certificates become anchors
    ///
    /// # Returns
    /// A validator that no longer depends on `store`
    ///
    /// # Errors
    /// Returns an error if OpenSSL cannot build the certificate store
    pub fn from_trust_store(store: &TrustStore) -> Result<Self> {
        let mut builder = X509StoreBuilder::new()?;
        builder.set_flags(X509VerifyFlags::PARTIAL_CHAIN)?;

        // Key entries anchor too; duplicates under other aliases are added once.
        let mut fingerprints = HashSet::new();
        for entry in store.entries() {
            let cert = entry.certificate();
            if fingerprints.insert(cert.sha256_fingerprint().to_string()) {
                builder.add_cert(cert.x509().to_owned())?;
            }
        }

        debug!("Trust validator built with {} anchor(s)", fingerprints.len());
        Ok(Self {
            store: builder.build(),
            fingerprints,
            revocation: None,
        })
    }

    /// Consult `check` for every certificate once the path validates
    pub fn with_revocation_check(mut self, check: Box<dyn RevocationCheck>) -> Self {
        self.revocation = Some(check);
        self
    }

    /// Number of distinct anchors
    pub fn anchors(&self) -> usize {
        self.fingerprints.len()
    }

    /// True if `cert` is one of the anchors
    pub fn is_anchor(&self, cert: &Certificate) -> bool {
        self.fingerprints.contains(cert.sha256_fingerprint())
    }

    /// Validate `chain`, leaf first
    ///
    /// Only the prefix up to the first presented certificate that is already
    /// stored takes part in path building. A stored leaf is verified on its
    /// own.
    fn verify(&self, chain: &CertificateChain) -> std::result::Result<(), TrustError> {
        let leaf = chain.leaf().ok_or(TrustError::EmptyChain)?;

        // Step 1: cut the chain at the first stored certificate
        let anchored = chain.iter().position(|cert| self.is_anchor(cert));
        if let Some(depth) = anchored {
            debug!("Presented certificate at depth {} is an anchor", depth);
        }
        let end = anchored.unwrap_or(chain.len()).max(1);

        // Step 2: the certificates in between are untrusted intermediates
        let mut untrusted = Stack::<X509>::new()?;
        for cert in &chain[1..end] {
            untrusted.push(cert.x509().to_owned())?;
        }

        // Step 3: path validation against the store
        let mut context = X509StoreContext::new()?;
        let (ok, reason, depth) = context.init(&self.store, leaf.x509(), &untrusted, |ctx| {
            let ok = ctx.verify_cert()?;
            Ok((ok, ctx.error().to_string(), ctx.error_depth()))
        })?;

        if !ok {
            return Err(TrustError::Rejected { depth, reason });
        }

        // Step 4: revocation hook over the whole presented chain
        if let Some(revocation) = &self.revocation {
            for (index, cert) in chain.iter().enumerate() {
                revocation.check(cert, chain.get(index + 1))?;
            }
        }

        Ok(())
    }
}

impl TrustValidator for StoreValidator {
    fn check_server_trusted(&self, chain: &CertificateChain, _auth_type: &str) -> std::result::Result<(), TrustError> {
        self.verify(chain)
    }

    fn check_client_trusted(&self, chain: &CertificateChain, _auth_type: &str) -> std::result::Result<(), TrustError> {
        self.verify(chain)
    }
}

impl fmt::Debug for StoreValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreValidator")
            .field("anchors", &self.fingerprints.len())
            .field("revocation", &self.revocation.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::cert::test_certs::{issue, pki};

    struct Verdict(bool);

    impl TrustValidator for Verdict {
        fn check_server_trusted(&self, _: &CertificateChain, _: &str) -> std::result::Result<(), TrustError> {
            if self.0 { Ok(()) } else { Err(TrustError::Rejected { depth: 0, reason: "no".into() }) }
        }

        fn check_client_trusted(&self, chain: &CertificateChain, auth_type: &str) -> std::result::Result<(), TrustError> {
            self.check_server_trusted(chain, auth_type)
        }
    }

    fn chain() -> (CertificateChain, Certificate) {
        let (root, intermediate, leaf) = pki("server.test");
        (CertificateChain::new(vec![leaf.cert, intermediate.cert]), root.cert)
    }

    #[test]
    fn test_records_chain_and_passes_verdict() {
        let (chain, _) = chain();

        let accepting = InterceptingValidator::new(Verdict(true));
        assert!(accepting.check_server_trusted(&chain, "ECDHE").is_ok());
        assert_eq!(accepting.chain(), chain);

        let rejecting = InterceptingValidator::new(Verdict(false));
        let err = rejecting.check_server_trusted(&chain, "ECDHE").unwrap_err();
        assert!(matches!(err, TrustError::Rejected { .. }));
        assert_eq!(rejecting.chain(), chain);
    }

    #[test]
    fn test_capture_only_always_accepts() {
        let (chain, _) = chain();
        let validator = InterceptingValidator::capture_only(Verdict(false));

        assert!(validator.check_server_trusted(&chain, "ECDHE").is_ok());
        assert_eq!(validator.chain().len(), 2);
        assert!(matches!(validator.delegate_verdict(), Some(Err(_))));
    }

    #[test]
    fn test_empty_until_called() {
        let validator = InterceptingValidator::new(Verdict(true));
        assert!(validator.chain().is_empty());
        assert!(!validator.was_called());
        assert_eq!(validator.delegate_verdict(), None);
    }

    #[test]
    fn test_later_call_replaces_chain_and_tracks_direction() {
        let (chain, root) = chain();
        let validator = InterceptingValidator::new(Verdict(true));

        validator.check_server_trusted(&chain, "RSA").unwrap();
        assert_eq!(validator.last_direction(), Some(ChainDirection::Server));

        let other = CertificateChain::new(vec![root.clone()]);
        validator.check_client_trusted(&other, "RSA").unwrap();
        assert_eq!(validator.chain(), other);
        assert_eq!(validator.last_direction(), Some(ChainDirection::Client));

        validator.clear();
        assert!(validator.chain().is_empty());
        assert!(!validator.was_called());
    }

    #[test]
    fn test_store_validator_trusts_anchored_chain() {
        let (root, intermediate, leaf) = pki("server.test");
        let chain = CertificateChain::new(vec![leaf.cert.clone(), intermediate.cert.clone()]);

        let empty = StoreValidator::from_trust_store(&TrustStore::new()).unwrap();
        assert!(matches!(
            empty.check_server_trusted(&chain, "ECDHE"),
            Err(TrustError::Rejected { .. })
        ));

        let mut store = TrustStore::new();
        store.set_certificate_entry("root", root.cert).unwrap();
        let validator = StoreValidator::from_trust_store(&store).unwrap();
        assert_eq!(validator.anchors(), 1);
        assert!(validator.check_server_trusted(&chain, "ECDHE").is_ok());
    }

    #[test]
    fn test_store_validator_accepts_stored_leaf() {
        let (_, intermediate, leaf) = pki("server.test");
        let chain = CertificateChain::new(vec![leaf.cert.clone(), intermediate.cert]);

        let mut store = TrustStore::new();
        store.set_certificate_entry("leaf", leaf.cert).unwrap();
        let validator = StoreValidator::from_trust_store(&store).unwrap();
        assert!(validator.check_server_trusted(&chain, "ECDHE").is_ok());
    }

    #[test]
    fn test_stored_leaf_wins_over_same_named_anchor() {
        let (_, intermediate, leaf) = pki("server.test");
        // Carries the real root's name under a different key
        let rotated = issue("Test Root CA", None, true, 9);
        let chain = CertificateChain::new(vec![leaf.cert.clone(), intermediate.cert.clone()]);

        let mut store = TrustStore::new();
        store.set_certificate_entry("leaf", leaf.cert.clone()).unwrap();
        store.set_certificate_entry("rotated", rotated.cert).unwrap();
        let validator = StoreValidator::from_trust_store(&store).unwrap();
        assert!(validator.is_anchor(&leaf.cert));
        assert!(!validator.is_anchor(&intermediate.cert));
        assert!(validator.check_server_trusted(&chain, "ECDHE").is_ok());

        // Without the leaf the same-named anchor still rejects the chain
        let mut store = TrustStore::new();
        store.set_certificate_entry("rotated", issue("Test Root CA", None, true, 10).cert).unwrap();
        let validator = StoreValidator::from_trust_store(&store).unwrap();
        assert!(matches!(
            validator.check_server_trusted(&chain, "ECDHE"),
            Err(TrustError::Rejected { .. })
        ));
    }

    #[test]
    fn test_stored_intermediate_ends_path_building() {
        let (root, intermediate, leaf) = pki("server.test");
        let rotated = issue("Test Root CA", None, true, 9);
        let chain = CertificateChain::new(vec![leaf.cert, intermediate.cert.clone(), root.cert]);

        let mut store = TrustStore::new();
        store.set_certificate_entry("intermediate", intermediate.cert).unwrap();
        store.set_certificate_entry("rotated", rotated.cert).unwrap();
        let validator = StoreValidator::from_trust_store(&store).unwrap();
        assert!(validator.check_server_trusted(&chain, "ECDHE").is_ok());
    }

    #[test]
    fn test_store_validator_rejects_empty_chain() {
        let validator = StoreValidator::from_trust_store(&TrustStore::new()).unwrap();
        assert!(matches!(
            validator.check_server_trusted(&CertificateChain::default(), "ECDHE"),
            Err(TrustError::EmptyChain)
        ));
    }

    struct DenySerial(String);

    impl RevocationCheck for DenySerial {
        fn check(&self, cert: &Certificate, _issuer: Option<&Certificate>) -> std::result::Result<(), TrustError> {
            if cert.serial() == self.0 {
                return Err(TrustError::Revoked {
                    subject: cert.subject().to_string(),
                    reason: "serial on deny list".into(),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn test_revocation_hook_runs_after_path_validation() {
        let (root, intermediate, leaf) = pki("server.test");
        let chain = CertificateChain::new(vec![leaf.cert.clone(), intermediate.cert]);

        let mut store = TrustStore::new();
        store.set_certificate_entry("root", root.cert).unwrap();

        let validator = StoreValidator::from_trust_store(&store)
            .unwrap()
            .with_revocation_check(Box::new(DenySerial(leaf.cert.serial().to_string())));
        assert!(matches!(
            validator.check_server_trusted(&chain, "ECDHE"),
            Err(TrustError::Revoked { .. })
        ));
    }
}
