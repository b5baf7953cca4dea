//! InstallCerts Command Line Tool
//!
//! This binary is the command-line interface for InstallCerts.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use log::{debug, info, warn};

use installcerts::common::log::effective_level;
use installcerts::common::{init_logger, parse_target, Result};
use installcerts::config::{OverwritePolicy, Settings};
use installcerts::store::{load_base_store, system_ca_bundle, InstallOutcome, TrustStoreBuilder};
use installcerts::tls::{CertificateChain, TlsProbe};
use installcerts::{APP_NAME, VERSION};

/// Fetch a TLS server's certificate chain and add the certificates needed to trust it
/// to a PKCS#12 keystore named after the host
#[derive(Parser, Debug)]
#[clap(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Server to contact: host, host:port or https://host[:port]/...
    #[clap(value_name = "URL")]
    url: String,

    /// Password protecting the written keystore [default: changeit]
    #[clap(short, long)]
    password: Option<String>,

    /// Only show the certificate chain and whether it is trusted
    #[clap(short, long)]
    all: bool,

    /// Debug logging, including every certificate verification step
    #[clap(short, long)]
    verbose: bool,

    /// Connect timeout in milliseconds [default: 5000]
    #[clap(short, long)]
    timeout: Option<u64>,

    /// Handshake timeout in milliseconds [default: same as --timeout]
    #[clap(long)]
    handshake_timeout: Option<u64>,

    /// Start from an empty trust store instead of the system CA bundle
    #[clap(long)]
    empty_store: bool,

    /// Start from this PKCS#12 keystore instead of the system CA bundle
    #[clap(long, value_name = "FILE")]
    keystore: Option<PathBuf>,

    /// Password of --keystore [default: the store password]
    #[clap(long)]
    keystore_password: Option<String>,

    /// Directory the keystore is written to [default: .]
    #[clap(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Overwrite an existing keystore without asking
    #[clap(short, long, conflicts_with = "no_overwrite")]
    force: bool,

    /// Fail instead of asking when the keystore already exists
    #[clap(long)]
    no_overwrite: bool,

    /// Write the whole working store, system CA bundle included
    #[clap(long)]
    include_ca: bool,

    /// Configuration file [default: installcerts.json when present]
    #[clap(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[clap(long)]
    log_level: Option<String>,
}

impl Args {
    /// Command line layer, applied over file and environment settings
    fn apply(&self, settings: &mut Settings) {
        if let Some(password) = &self.password {
            settings.store_password = password.clone();
        }
        if let Some(timeout) = self.timeout {
            settings.timeout_ms = timeout;
        }
        if let Some(timeout) = self.handshake_timeout {
            settings.handshake_timeout_ms = Some(timeout);
        }
        if self.empty_store {
            settings.empty_store = true;
        }
        if let Some(keystore) = &self.keystore {
            settings.keystore = Some(keystore.clone());
        }
        if let Some(password) = &self.keystore_password {
            settings.keystore_password = Some(password.clone());
        }
        if let Some(dir) = &self.output_dir {
            settings.output_dir = dir.clone();
        }
        if self.force {
            settings.overwrite = OverwritePolicy::Force;
        }
        if self.no_overwrite {
            settings.overwrite = OverwritePolicy::Fail;
        }
        if self.include_ca {
            settings.include_ca_bundle = true;
        }
        if let Some(level) = &self.log_level {
            settings.log_level = level.clone();
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let mut settings = Settings::load(args.config.as_deref())?;
    args.apply(&mut settings);
    settings.validate()?;

    init_logger(effective_level(&settings.log_level, args.verbose));
    info!("Starting {} v{}", APP_NAME, VERSION);
    debug!("Effective settings: {:?}", settings);

    let target = parse_target(&args.url)?;
    let base = load_base_store(&settings.base_store(), settings.keystore_password(), system_ca_bundle)?;

    let probe_config = settings.probe_config(args.all, args.verbose);
    let mut builder = TrustStoreBuilder::new(target, &settings, probe_config, TlsProbe::new())
        .with_confirmation(confirm_overwrite);

    match builder.run(&base)? {
        InstallOutcome::AlreadyTrusted { chain } => {
            print_chain(&chain);
            println!("No errors, certificate is already trusted");
        }
        InstallOutcome::Inspected { chain, trusted } => {
            print_chain(&chain);
            if trusted {
                println!("Certificate chain is trusted");
            } else {
                println!("Certificate chain is NOT trusted");
            }
        }
        InstallOutcome::Saved { path, aliases, chain } => {
            print_chain(&chain);
            for alias in &aliases {
                println!("Added certificate to keystore '{}' using alias '{}'", path.display(), alias);
            }
        }
    }

    Ok(())
}

fn print_chain(chain: &CertificateChain) {
    println!("\nServer sent {} certificate(s):\n", chain.len());
    for (index, cert) in chain.iter().enumerate() {
        for (line_no, line) in cert.render().lines().enumerate() {
            if line_no == 0 {
                println!(" {} {}", index + 1, line);
            } else {
                println!("   {}", line);
            }
        }
        match cert.days_until_expiry() {
            Some(days) if days < 0 => println!("   Status : expired"),
            Some(days) => println!("   Status : {} days left", days),
            None => {}
        }
        println!();
    }
}

/// Ask on the terminal; without one the answer is no
fn confirm_overwrite(path: &Path) -> bool {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        warn!("{} exists and there is no terminal to confirm overwriting it", path.display());
        return false;
    }

    print!("{} already exists. Overwrite? [y/N] ", path.display());
    if io::stdout().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    match stdin.lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}
