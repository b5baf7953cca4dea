//! Shared helpers for the integration tests
//!
//! Certificates are generated on the fly; nothing is read from disk.

#![allow(dead_code)]

use std::io::Read;
use std::net::TcpListener;
use std::thread;

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{SslAcceptor, SslAcceptorBuilder, SslMethod, SslVerifyMode, SslVersion};
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
use openssl::x509::{X509NameBuilder, X509};

use installcerts::common::{ConnectionTarget, InstallError, Result};
use installcerts::config::ProbeConfig;
use installcerts::tls::{
    Certificate, CertificateChain, HandshakeResult, InterceptingValidator, Prober, TrustError,
    TrustValidator,
};
use installcerts::TrustStore;

pub struct Issued {
    pub cert: Certificate,
    pub key: PKey<Private>,
}

fn key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

/// Issue a certificate for `cn`, self-signed without `issuer`
pub fn issue(cn: &str, issuer: Option<&Issued>, ca: bool, serial: u32) -> Issued {
    let key = key();
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", cn).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    match issuer {
        Some(issuer) => builder.set_issuer_name(issuer.cert.x509().subject_name()).unwrap(),
        None => builder.set_issuer_name(&name).unwrap(),
    }
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(30).unwrap()).unwrap();
    if ca {
        builder.append_extension(BasicConstraints::new().critical().ca().build().unwrap()).unwrap();
    } else {
        let san = SubjectAlternativeName::new()
            .dns(cn)
            .ip("127.0.0.1")
            .build(&builder.x509v3_context(None, None))
            .unwrap();
        builder.append_extension(san).unwrap();
    }
    let signing_key = issuer.map(|i| &i.key).unwrap_or(&key);
    builder.sign(signing_key, MessageDigest::sha256()).unwrap();

    Issued {
        cert: Certificate::from_x509(&builder.build()).unwrap(),
        key,
    }
}

/// Root, intermediate and leaf for `cn`
pub fn pki(cn: &str) -> (Issued, Issued, Issued) {
    let root = issue(&format!("{} Root CA", cn), None, true, 1);
    let intermediate = issue(&format!("{} Intermediate CA", cn), Some(&root), true, 2);
    let leaf = issue(cn, Some(&intermediate), false, 3);
    (root, intermediate, leaf)
}

/// Local TLS server presenting `leaf` followed by `extra`
///
/// Serves handshakes on a background thread until the test process exits.
pub fn spawn_tls_server(leaf: &Issued, extra: &[&Certificate]) -> u16 {
    serve(acceptor(leaf, extra))
}

/// Local TLS 1.2 server that insists on a client certificate
///
/// Its chain reaches the client before the handshake is aborted.
pub fn spawn_client_auth_server(leaf: &Issued, extra: &[&Certificate]) -> u16 {
    let mut acceptor = acceptor(leaf, extra);
    acceptor.set_max_proto_version(Some(SslVersion::TLS1_2)).unwrap();
    acceptor.set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT);
    serve(acceptor)
}

fn acceptor(leaf: &Issued, extra: &[&Certificate]) -> SslAcceptorBuilder {
    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    acceptor.set_private_key(&leaf.key).unwrap();
    acceptor.set_certificate(leaf.cert.x509()).unwrap();
    for cert in extra {
        acceptor.add_extra_chain_cert(cert.x509().to_owned()).unwrap();
    }
    acceptor.check_private_key().unwrap();
    acceptor
}

fn serve(acceptor: SslAcceptorBuilder) -> u16 {
    let acceptor = acceptor.build();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            if let Ok(mut tls) = acceptor.accept(stream) {
                // Wait for the client to close the session.
                let mut buf = [0u8; 64];
                let _ = tls.read(&mut buf);
            }
        }
    });

    port
}

/// Peer that presents a fixed chain without touching the network
pub struct FakePeer {
    pub chain: CertificateChain,
    pub calls: usize,
    /// Fail the n-th call (1-based) with a network error
    pub fail_on: Option<usize>,
}

impl FakePeer {
    pub fn new(chain: Vec<Certificate>) -> Self {
        Self {
            chain: CertificateChain::new(chain),
            calls: 0,
            fail_on: None,
        }
    }

    pub fn failing_on(mut self, call: usize) -> Self {
        self.fail_on = Some(call);
        self
    }
}

impl Prober for FakePeer {
    fn attempt_handshake<V: TrustValidator>(
        &mut self,
        target: &ConnectionTarget,
        validator: &InterceptingValidator<V>,
        _config: &ProbeConfig,
    ) -> Result<HandshakeResult> {
        self.calls += 1;
        // Every attempt must start from a fresh validator.
        assert!(!validator.was_called());
        assert!(validator.chain().is_empty());

        if self.fail_on == Some(self.calls) {
            return Err(InstallError::network(target, "connection reset by peer"));
        }

        if self.chain.is_empty() {
            return Ok(HandshakeResult {
                trusted: false,
                chain: validator.chain(),
                session_info: Some("TLSv1.3 TEST".to_string()),
                rejection: Some("no certificate presented".to_string()),
            });
        }

        let verdict = validator.check_server_trusted(&self.chain, "TEST");
        Ok(HandshakeResult {
            trusted: verdict.is_ok(),
            chain: validator.chain(),
            session_info: Some("TLSv1.3 TEST".to_string()),
            rejection: verdict.err().map(|e| e.to_string()),
        })
    }
}

/// Trusts a chain only once the certificate at `position` is in the store
///
/// Models a server whose anchor sits inside the presented chain.
pub struct AnchorAt {
    trusted: Vec<Certificate>,
    position: usize,
}

impl AnchorAt {
    pub fn new(store: &TrustStore, position: usize) -> Self {
        Self {
            trusted: store.entries().map(|e| e.certificate().clone()).collect(),
            position,
        }
    }
}

impl TrustValidator for AnchorAt {
    fn check_server_trusted(&self, chain: &CertificateChain, _auth_type: &str) -> std::result::Result<(), TrustError> {
        match chain.get(self.position) {
            Some(anchor) if self.trusted.contains(anchor) => Ok(()),
            _ => Err(TrustError::Rejected {
                depth: self.position as u32,
                reason: "unable to get local issuer certificate".to_string(),
            }),
        }
    }

    fn check_client_trusted(&self, chain: &CertificateChain, auth_type: &str) -> std::result::Result<(), TrustError> {
        self.check_server_trusted(chain, auth_type)
    }
}
