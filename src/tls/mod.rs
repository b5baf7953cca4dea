//! TLS handling module
//!
//! Certificate analysis, trust decisions and the handshake probe.

pub mod cert;
pub mod probe;
pub mod validator;

pub use cert::{Certificate, CertificateChain};
pub use probe::{attempt_handshake, HandshakeResult, Prober, TlsProbe};
pub use validator::{
    ChainDirection, InterceptingValidator, RevocationCheck, StoreValidator, TrustError,
    TrustValidator,
};
