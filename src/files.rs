//! Trust stores and identities read from PEM files on disk.
//!
//! # Command line flags
//!
//! | Flag          | Default  | Meaning                 |
//! |---------------|----------|-------------------------|
//! | `--truststore` | None    | File of PEM-format X.509 certificate(s) to trust. Repeatable, one trust store per file |
//! | `--identity-key-path` | None | File containing a PEM-format private key |
//! | `--identity-cert-path` | None | File containing the PEM-format X.509 certificate chain for that key |
//! | `--trust-all-certificates-without-validation` | false | Accept every peer certificate. Dangerous |
//! | `--tls-protocol` | TLSv1.2, TLSv1.3 | Allowed protocol version. Repeatable |
//! | `--tls-cipher-suite` | All safe suites | Allowed cipher suite by rustls name. Repeatable |
//! | `--disable-hostname-verification` | false | Accept any server hostname |
//!
//! ```
//! use clap::Parser;
//!
//! #[derive(Parser)]
//! struct Cli {
//!     #[command(flatten)]
//!     tls: tls_material::files::Args,
//! }
//!
//! let cli = Cli::parse_from(["cmd", "--trust-all-certificates-without-validation"]);
//! let bundle = cli.tls.builder().unwrap().build().unwrap();
//! assert!(bundle.validator().bypasses_validation());
//! ```

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::builder::{ConfigurationError, TlsMaterialBuilder};
use crate::bundle::{cipher_suite_by_name, protocol_version_by_name};
use crate::identity::IdentityMaterial;
use crate::store::TrustStore;

/// Command line arguments for loading TLS material from files. Flatten
/// into the binary's parser.
#[derive(clap::Args, Debug, Default)]
#[group(id = "tls_material_args")]
pub struct Args {
    #[arg(
        long,
        help = "Path to trusted certificates in PEM format. May be repeated; each file is a separate trust store."
    )]
    truststore: Vec<PathBuf>,

    #[arg(
        long,
        requires = "identity_cert_path",
        help = "Path to TLS private key in PEM format."
    )]
    identity_key_path: Option<PathBuf>,

    #[arg(
        long,
        requires = "identity_key_path",
        help = "Path to TLS certificate chain in PEM format."
    )]
    identity_cert_path: Option<PathBuf>,

    #[arg(
        long,
        help = "Accept all peer certificates without validating them. For testing only."
    )]
    trust_all_certificates_without_validation: bool,

    #[arg(long, help = "Allowed TLS protocol version (TLSv1.2 or TLSv1.3). May be repeated.")]
    tls_protocol: Vec<String>,

    #[arg(long, help = "Allowed TLS cipher suite. May be repeated.")]
    tls_cipher_suite: Vec<String>,

    #[arg(long, help = "Accept server certificates regardless of hostname.")]
    disable_hostname_verification: bool,
}

/// Error type returned when loading TLS material from files.
#[derive(Debug, Error)]
pub enum FilesError {
    /// Wrapper for std::io::Error
    #[error("{0}")]
    IOError(#[from] std::io::Error),
    /// The file contents were rejected.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),
    /// The key file does not contain a private key.
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
    /// Only one of the identity key and certificate was given.
    #[error("--identity-key-path and --identity-cert-path must be given together")]
    IncompleteIdentity,
    /// Not a protocol version name.
    #[error("unknown TLS protocol version {0}")]
    UnknownProtocol(String),
    /// Not a cipher suite the crypto provider offers.
    #[error("unknown TLS cipher suite {0}")]
    UnknownCipherSuite(String),
}

fn read_file(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

/// Load a trust store from a PEM file. The store is labelled with the
/// file's path; a file without certificates yields an empty store and a
/// warning.
pub fn load_trust_store(path: &Path) -> Result<TrustStore, FilesError> {
    let pem = read_file(path)?;
    Ok(TrustStore::from_pem(path.display().to_string(), &pem)?)
}

/// Load a private key and its certificate chain from PEM files.
pub fn load_identity_material(
    key_path: &Path,
    cert_path: &Path,
) -> Result<IdentityMaterial, FilesError> {
    let key_pem = read_file(key_path)?;
    let key = rustls_pemfile::private_key(&mut Cursor::new(&key_pem))?
        .ok_or_else(|| FilesError::NoPrivateKey(key_path.to_owned()))?;
    let cert_pem = read_file(cert_path)?;
    let chain =
        rustls_pemfile::certs(&mut Cursor::new(&cert_pem)).collect::<Result<Vec<_>, _>>()?;
    Ok(IdentityMaterial::new(key, chain))
}

impl Args {
    /// Read every configured file once and return a builder staged with
    /// the result. The builder can be extended further before building.
    pub fn builder(&self) -> Result<TlsMaterialBuilder, FilesError> {
        let mut builder = TlsMaterialBuilder::new();
        for path in &self.truststore {
            builder = builder.with_trust_store(load_trust_store(path)?);
        }
        match (&self.identity_key_path, &self.identity_cert_path) {
            (Some(key), Some(cert)) => {
                builder = builder.with_identity_material(load_identity_material(key, cert)?);
            }
            (None, None) => (),
            _ => return Err(FilesError::IncompleteIdentity),
        }
        if self.trust_all_certificates_without_validation {
            builder = builder.with_trusting_all_certificates_without_validation();
        }
        if !self.tls_protocol.is_empty() {
            let versions = self
                .tls_protocol
                .iter()
                .map(|name| {
                    protocol_version_by_name(name)
                        .ok_or_else(|| FilesError::UnknownProtocol(name.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            builder = builder.with_protocols(&versions);
        }
        if !self.tls_cipher_suite.is_empty() {
            let provider = crate::crypto_provider::default_crypto_provider();
            let suites = self
                .tls_cipher_suite
                .iter()
                .map(|name| {
                    cipher_suite_by_name(&provider, name)
                        .ok_or_else(|| FilesError::UnknownCipherSuite(name.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            builder = builder.with_cipher_suites(&suites);
        }
        if self.disable_hostname_verification {
            builder = builder.with_unsafe_hostname_verifier();
        }
        Ok(builder)
    }
}
