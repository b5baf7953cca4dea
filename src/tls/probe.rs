//! TLS handshake probe
//!
//! Opens one TLS client connection, lets a [`TrustValidator`] decide on the
//! presented chain and reports what happened as a [`HandshakeResult`].

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};

use log::{debug, info, warn};
use openssl::ssl::{HandshakeError, SslConnector, SslMethod, SslRef, SslVerifyMode};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::common::{ConnectionTarget, InstallError, Result};
use crate::config::ProbeConfig;
use super::cert::CertificateChain;
use super::validator::{InterceptingValidator, TrustValidator};

/// Outcome of one handshake attempt
#[derive(Debug, Clone)]
pub struct HandshakeResult {
    /// The validator accepted the presented chain
    pub trusted: bool,
    /// Chain recorded by the validator, leaf first
    pub chain: CertificateChain,
    /// Negotiated protocol and cipher, when the handshake completed
    pub session_info: Option<String>,
    /// Rejection reason when `trusted` is false
    pub rejection: Option<String>,
}

/// Something that can run a handshake against a target
///
/// [`TlsProbe`] is the real implementation; the trust store builder only
/// depends on this trait.
pub trait Prober {
    /// Perform one handshake, letting `validator` make the trust decision
    ///
    /// A rejected chain is an `Ok` result with `trusted == false`, and so is
    /// a handshake that fails after the chain arrived. Transport failures
    /// before any certificate was received are returned as
    /// [`InstallError::Network`].
    fn attempt_handshake<V: TrustValidator>(
        &mut self,
        target: &ConnectionTarget,
        validator: &InterceptingValidator<V>,
        config: &ProbeConfig,
    ) -> Result<HandshakeResult>;
}

/// Blocking OpenSSL client probe
#[derive(Debug, Default, Clone, Copy)]
pub struct TlsProbe;

impl TlsProbe {
    pub fn new() -> Self {
        Self
    }
}

impl Prober for TlsProbe {
    fn attempt_handshake<V: TrustValidator>(
        &mut self,
        target: &ConnectionTarget,
        validator: &InterceptingValidator<V>,
        config: &ProbeConfig,
    ) -> Result<HandshakeResult> {
        attempt_handshake(target, validator, config)
    }
}

/// Connect to `target`, handshake, and let `validator` judge the peer chain
///
/// OpenSSL's own verification is switched off; the chain the peer sent is
/// handed to `validator`, which is the only trust decision made. The socket
/// is owned by the TLS stream and closed on every return path.
///
/// # Parameters
/// * `target` - Server to connect to
/// * `validator` - Fresh validator for this attempt; records the chain
/// * `config` - Connect and handshake timeouts, tracing
///
/// # Returns
/// The verdict and the recorded chain. A handshake that breaks off after
/// the server sent its certificates is an untrusted result carrying that
/// chain.
///
/// # Errors
/// Returns [`InstallError::Network`] when the connection fails before any
/// certificate was received
pub fn attempt_handshake<V: TrustValidator>(
    target: &ConnectionTarget,
    validator: &InterceptingValidator<V>,
    config: &ProbeConfig,
) -> Result<HandshakeResult> {
    // Step 1: TCP connection bounded by the configured timeouts
    let connector = build_connector(config)?;
    let stream = connect(target, config)?;

    // Step 2: TLS handshake
    info!("Starting SSL handshake with {}...", target);
    let ssl = connector.configure()?.verify_hostname(false);

    let mut tls = match ssl.connect(&target.host, stream) {
        Ok(tls) => tls,
        Err(HandshakeError::SetupFailure(e)) => return Err(InstallError::Ssl(e)),
        Err(HandshakeError::Failure(mid)) => {
            let failure = format!(
                "TLS handshake failed ({}): {}",
                mid.ssl().state_string_long(),
                mid.error()
            );
            return interrupted(target, mid.ssl(), validator, failure);
        }
        Err(HandshakeError::WouldBlock(mid)) => {
            let failure = format!("TLS handshake timed out after {:?}", config.handshake_timeout());
            return interrupted(target, mid.ssl(), validator, failure);
        }
    };

    let session_info = session_info(tls.ssl());
    if config.debug_tracing {
        debug!("Negotiated session: {}", session_info);
    }

    // Step 3: the validator judges the presented chain
    let presented = peer_chain(tls.ssl())?;
    let verdict = if presented.is_empty() {
        // Nothing to decide on, the validator is never called.
        Err(None)
    } else {
        validator
            .check_server_trusted(&presented, auth_type(tls.ssl()))
            .map_err(Some)
    };

    if let Err(e) = tls.shutdown() {
        debug!("TLS shutdown with {} failed: {}", target, e);
    }

    let result = match verdict {
        Ok(()) => HandshakeResult {
            trusted: true,
            chain: validator.chain(),
            session_info: Some(session_info),
            rejection: None,
        },
        Err(reason) => {
            let rejection = reason
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no certificate presented".to_string());
            if config.debug_tracing {
                warn!("Validation of {} failed: {}", target, rejection);
            }
            HandshakeResult {
                trusted: false,
                chain: validator.chain(),
                session_info: Some(session_info),
                rejection: Some(rejection),
            }
        }
    };

    Ok(result)
}

/// Outcome of a handshake that broke off
///
/// Certificates received before the failure still go to `validator` and the
/// attempt counts as untrusted. Without any certificate the failure is a
/// network error.
fn interrupted<V: TrustValidator>(
    target: &ConnectionTarget,
    ssl: &SslRef,
    validator: &InterceptingValidator<V>,
    failure: String,
) -> Result<HandshakeResult> {
    let presented = peer_chain(ssl)?;
    if presented.is_empty() {
        return Err(InstallError::network(target, failure));
    }

    warn!(
        "Handshake with {} broke off after {} certificate(s) were received: {}",
        target,
        presented.len(),
        failure
    );
    let rejection = match validator.check_server_trusted(&presented, auth_type(ssl)) {
        Ok(()) => failure,
        Err(e) => format!("{}; {}", failure, e),
    };

    Ok(HandshakeResult {
        trusted: false,
        chain: validator.chain(),
        session_info: None,
        rejection: Some(rejection),
    })
}

fn peer_chain(ssl: &SslRef) -> Result<CertificateChain> {
    match ssl.peer_cert_chain() {
        Some(stack) => CertificateChain::from_x509s(stack.iter()),
        None => Ok(CertificateChain::default()),
    }
}

fn auth_type(ssl: &SslRef) -> &'static str {
    ssl.current_cipher().map(|c| c.name()).unwrap_or("UNKNOWN")
}

fn build_connector(config: &ProbeConfig) -> Result<SslConnector> {
    let mut builder = SslConnector::builder(SslMethod::tls())?;

    let tracing = config.debug_tracing;
    builder.set_verify_callback(SslVerifyMode::PEER, move |preverify_ok, ctx| {
        if tracing {
            debug!(
                "OpenSSL verify depth={} preverify={} ({})",
                ctx.error_depth(),
                preverify_ok,
                ctx.error()
            );
        }
        // The chain is judged by the TrustValidator after the handshake.
        true
    });

    Ok(builder.build())
}

/// Open a TCP connection bounded by the connect timeout, with the handshake
/// timeout applied to every read and write
fn connect(target: &ConnectionTarget, config: &ProbeConfig) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| InstallError::network(target, format!("unable to resolve host: {}", e)))?
        .collect();

    let mut last_error = None;
    for addr in addrs {
        debug!("Connecting to {} ({})", target, addr);
        match connect_addr(&addr, config) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Connection to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    let message = match last_error {
        Some(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {
            format!("connect timed out after {:?}", config.connect_timeout())
        }
        Some(e) => e.to_string(),
        None => "host resolved to no addresses".to_string(),
    };
    Err(InstallError::network(target, message))
}

fn connect_addr(addr: &SocketAddr, config: &ProbeConfig) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.connect_timeout(&SockAddr::from(*addr), config.connect_timeout())?;
    socket.set_read_timeout(Some(config.handshake_timeout()))?;
    socket.set_write_timeout(Some(config.handshake_timeout()))?;
    Ok(socket.into())
}

fn session_info(ssl: &SslRef) -> String {
    let cipher = ssl
        .current_cipher()
        .map(|c| c.name())
        .unwrap_or("none");
    format!("{} {}", ssl.version_str(), cipher)
}
