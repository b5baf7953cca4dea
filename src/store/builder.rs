//! Incremental trust store construction
//!
//! Probes the target against a base store and, while the server stays
//! untrusted, adds the presented chain one certificate at a time (leaf
//! first) until a probe succeeds. Only a successful extension is persisted.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::common::{keystore_path, ConnectionTarget, InstallError, Result};
use crate::config::{OverwritePolicy, ProbeConfig, Settings};
use crate::tls::{CertificateChain, HandshakeResult, InterceptingValidator, Prober, StoreValidator, TrustValidator};
use super::pkcs12;
use super::truststore::TrustStore;

/// Builder state, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Probing,
    Extending,
    Success,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Init => write!(f, "init"),
            Phase::Probing => write!(f, "probing"),
            Phase::Extending => write!(f, "extending"),
            Phase::Success => write!(f, "success"),
            Phase::Failed => write!(f, "failed"),
        }
    }
}

/// Successful end of a run
#[derive(Debug, Clone)]
pub enum InstallOutcome {
    /// The base store already trusts the server; nothing was written
    AlreadyTrusted { chain: CertificateChain },
    /// Capture-only run; `trusted` is the validator's genuine verdict
    Inspected { chain: CertificateChain, trusted: bool },
    /// The store was extended and written to `path`
    Saved {
        path: PathBuf,
        aliases: Vec<String>,
        chain: CertificateChain,
    },
}

impl InstallOutcome {
    /// Chain presented by the server
    pub fn chain(&self) -> &CertificateChain {
        match self {
            InstallOutcome::AlreadyTrusted { chain }
            | InstallOutcome::Inspected { chain, .. }
            | InstallOutcome::Saved { chain, .. } => chain,
        }
    }
}

type ValidatorFactory<V> = Box<dyn Fn(&TrustStore) -> Result<V>>;
type Confirmation = Box<dyn FnMut(&Path) -> bool>;

/// Drives probes and store extension for one target
pub struct TrustStoreBuilder<P, V = StoreValidator> {
    target: ConnectionTarget,
    probe_config: ProbeConfig,
    prober: P,
    validator_factory: ValidatorFactory<V>,
    confirm: Confirmation,
    output_dir: PathBuf,
    store_password: String,
    overwrite: OverwritePolicy,
    include_ca_bundle: bool,
    phase: Phase,
    probes: usize,
}

impl<P: Prober> TrustStoreBuilder<P, StoreValidator> {
    /// Builder validating against the working store with [`StoreValidator`]
    ///
    /// Overwrite prompts are declined until [`with_confirmation`](Self::with_confirmation)
    /// installs something that can answer them.
    ///
    /// # Parameters
    /// * `target` - Server whose chain is installed
    /// * `settings` - Output directory, store password, overwrite policy
    /// * `probe_config` - Timeouts and capture-only mode for every probe
    /// * `prober` - Performs the handshakes
    pub fn new(target: ConnectionTarget, settings: &Settings, probe_config: ProbeConfig, prober: P) -> Self {
        Self {
            target,
            probe_config,
            prober,
            validator_factory: Box::new(StoreValidator::from_trust_store),
            confirm: Box::new(|_| false),
            output_dir: settings.output_dir.clone(),
            store_password: settings.store_password.clone(),
            overwrite: settings.overwrite,
            include_ca_bundle: settings.include_ca_bundle,
            phase: Phase::Init,
            probes: 0,
        }
    }
}

impl<P: Prober, V: TrustValidator> TrustStoreBuilder<P, V> {
    /// Replace the validator built for every probe
    pub fn with_validator<W, F>(self, factory: F) -> TrustStoreBuilder<P, W>
    where
        W: TrustValidator,
        F: Fn(&TrustStore) -> Result<W> + 'static,
    {
        TrustStoreBuilder {
            target: self.target,
            probe_config: self.probe_config,
            prober: self.prober,
            validator_factory: Box::new(factory),
            confirm: self.confirm,
            output_dir: self.output_dir,
            store_password: self.store_password,
            overwrite: self.overwrite,
            include_ca_bundle: self.include_ca_bundle,
            phase: self.phase,
            probes: self.probes,
        }
    }

    /// Answer overwrite prompts with `confirm`
    pub fn with_confirmation<F>(mut self, confirm: F) -> Self
    where
        F: FnMut(&Path) -> bool + 'static,
    {
        self.confirm = Box::new(confirm);
        self
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Handshakes attempted so far
    pub fn probe_count(&self) -> usize {
        self.probes
    }

    pub fn prober(&self) -> &P {
        &self.prober
    }

    /// File a successful run writes to
    pub fn output_path(&self) -> PathBuf {
        keystore_path(&self.output_dir, &self.target.host)
    }

    /// Run the probe and extension loop starting from `base`
    ///
    /// `base` is never modified. The written file holds the added entries
    /// only, or the whole working store with `include_ca_bundle`.
    ///
    /// # Parameters
    /// * `base` - Anchors trusted before anything is added
    ///
    /// # Returns
    /// How the run ended: already trusted, inspected, or saved
    ///
    /// # Errors
    /// * [`InstallError::Network`] when a probe cannot reach the server
    /// * [`InstallError::EmptyChain`] when the server presents no certificate
    /// * [`InstallError::ValidationExhausted`] when the whole chain did not help
    /// * [`InstallError::Persistence`] when the keystore cannot be written
    pub fn run(&mut self, base: &TrustStore) -> Result<InstallOutcome> {
        self.phase = Phase::Init;
        info!(
            "Opening connection to {} with {} trusted certificate(s)",
            self.target,
            base.len()
        );

        // Step 1: probe against the base store
        self.transition(Phase::Probing);
        let (initial, delegate_trusted) = self.probe(base)?;

        // Step 2: inspection and already-trusted runs end here
        if self.probe_config.capture_only {
            if initial.chain.is_empty() {
                return self.fail(InstallError::EmptyChain { target: self.target.to_string() });
            }
            self.transition(Phase::Success);
            return Ok(InstallOutcome::Inspected {
                chain: initial.chain,
                trusted: delegate_trusted.unwrap_or(false),
            });
        }

        if initial.trusted {
            info!("No errors, certificate chain of {} is already trusted", self.target);
            self.transition(Phase::Success);
            return Ok(InstallOutcome::AlreadyTrusted { chain: initial.chain });
        }

        if initial.chain.is_empty() {
            return self.fail(InstallError::EmptyChain { target: self.target.to_string() });
        }

        info!(
            "{} is untrusted ({}), server sent {} certificate(s)",
            self.target,
            initial.rejection.as_deref().unwrap_or("rejected"),
            initial.chain.len()
        );

        // Step 3: add the chain leaf first, re-probing after every addition
        let chain = initial.chain;
        let mut working = base.clone();
        let mut added = Vec::with_capacity(chain.len());

        for (index, cert) in chain.iter().enumerate() {
            self.transition(Phase::Extending);
            let alias = self.target.alias_for(index);

            let mut candidate = working.clone();
            if let Err(e) = candidate.set_certificate_entry(alias.clone(), cert.clone()) {
                return self.fail(e);
            }
            working = candidate;
            added.push(alias.clone());
            info!("Added certificate {} ({}) using alias '{}'", index + 1, cert.subject(), alias);

            self.transition(Phase::Probing);
            let (result, _) = self.probe(&working)?;
            if result.trusted {
                // Step 4: persist the first store that is trusted
                let path = self.persist(&working, &added)?;
                self.transition(Phase::Success);
                return Ok(InstallOutcome::Saved {
                    path,
                    aliases: added,
                    chain,
                });
            }
            debug!(
                "Still untrusted after adding '{}': {}",
                alias,
                result.rejection.as_deref().unwrap_or("rejected")
            );
        }

        self.fail(InstallError::ValidationExhausted {
            target: self.target.to_string(),
            added: added.len(),
        })
    }

    /// One handshake with a fresh validator bound to `store`
    ///
    /// Also returns the delegate's own verdict, which differs from the
    /// result only in capture-only mode.
    fn probe(&mut self, store: &TrustStore) -> Result<(HandshakeResult, Option<bool>)> {
        let delegate = (self.validator_factory)(store)?;
        let validator = InterceptingValidator::with_mode(delegate, self.probe_config.capture_only);

        self.probes += 1;
        debug!("Probe #{} of {}", self.probes, self.target);
        let result = match self.prober.attempt_handshake(&self.target, &validator, &self.probe_config) {
            Ok(result) => result,
            Err(e) => {
                self.phase = Phase::Failed;
                return Err(e);
            }
        };

        let delegate_trusted = validator.delegate_verdict().map(|verdict| verdict.is_ok());
        Ok((result, delegate_trusted))
    }

    fn persist(&mut self, working: &TrustStore, added: &[String]) -> Result<PathBuf> {
        let store = if self.include_ca_bundle {
            working.clone()
        } else {
            working.subset(added)?
        };
        let path = self.output_path();

        match pkcs12::write(&store, &path, &self.store_password, self.overwrite, &mut *self.confirm) {
            Ok(path) => Ok(path),
            Err(e) => self.fail(e),
        }
    }

    fn transition(&mut self, next: Phase) {
        debug!("{}: {} -> {}", self.target, self.phase, next);
        self.phase = next;
    }

    fn fail<T>(&mut self, error: InstallError) -> Result<T> {
        warn!("{}: {}", self.target, error);
        self.transition(Phase::Failed);
        Err(error)
    }
}
