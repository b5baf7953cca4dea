//! Tool to check the OpenSSL environment and the platform CA bundle

use std::process::exit;

use installcerts::store::system::{find_ca_bundle, system_ca_bundle, CA_BUNDLE_PATHS, CA_FILE_ENV};
use installcerts::{APP_NAME, VERSION};

fn main() {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "warn"),
    );

    println!("=== {} {} Environment Check ===\n", APP_NAME, VERSION);

    println!("OpenSSL version: {}", openssl::version::version());
    println!("OpenSSL directory: {}", openssl::version::dir());

    match std::env::var(CA_FILE_ENV) {
        Ok(value) => println!("{}={}", CA_FILE_ENV, value),
        Err(_) => println!("{} is not set", CA_FILE_ENV),
    }

    println!("\nKnown CA bundle locations:");
    for path in CA_BUNDLE_PATHS {
        let marker = if std::path::Path::new(path).is_file() { "found" } else { "-" };
        println!("  [{:5}] {}", marker, path);
    }

    match find_ca_bundle() {
        Some(path) => println!("\nCA bundle in use: {}", path.display()),
        None => println!("\nNo CA bundle file found, OpenSSL default paths will be used"),
    }

    match system_ca_bundle() {
        Ok(store) if store.is_empty() => {
            println!("\nThe system trust store is empty.");
            println!("Servers can only be trusted after running with --empty-store or --keystore.");
            exit(1);
        }
        Ok(store) => {
            println!("System trust store: {} certificate(s)", store.len());
            println!("\nNo issues found.");
        }
        Err(e) => {
            println!("\nUnable to load the system trust store: {}", e);
            exit(1);
        }
    }
}
