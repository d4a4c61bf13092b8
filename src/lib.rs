//! Composite TLS trust validation.
//!
//! Trust for TLS peers usually comes from more than one place: a corporate
//! CA, a handful of pinned self-signed certificates, perhaps a custom
//! check. This crate merges any number of such sources into one
//! [`CompositeValidator`] which accepts a certificate chain if at least one
//! source does, and writes an audit record for every source on every
//! handshake.
//!
//! The validator, an optional local identity, the allowed protocol versions
//! and cipher suites, and a hostname verifier are packaged by
//! [`TlsMaterialBuilder`] into an immutable [`TlsMaterialBundle`]. Bundles
//! can be turned into rustls client and server configurations or, for other
//! transports, used directly.
//!
//! ```
//! use tls_material::{ClientAuthEnabled, TlsMaterialBuilder, TrustStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bundle = TlsMaterialBuilder::new()
//!     .with_trust_store(TrustStore::new("corporate", [])?)
//!     .build()?;
//! let client = bundle.client_config();
//! let server = bundle.server_config::<ClientAuthEnabled>();
//! # let _ = (client, server);
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - `files`: [`files::Args`], command line flags for loading trust stores
//!   and an identity from PEM files.
//! - `metrics`: Prometheus counters of validations and dropped audit
//!   records, and a gauge of identity expiry.
//! - `diag`: HTML diagnostics with [`TlsMaterialBundle::diag`].
//!
//! All are enabled by default.

#![warn(missing_docs)]

pub mod api;
pub mod audit;
mod builder;
mod bundle;
mod composite;
pub mod crypto_provider;
mod dispatch;
#[cfg(feature = "files")]
pub mod files;
mod identity;
mod store;
#[cfg(test)]
mod testdata;
mod trust_all;

pub use api::{CertificateChain, CertificateValidator, Decision, PeerRole, RejectReason};
pub use audit::{AuditEvent, AuditRecord, AuditSink, AuditSinkError, ChannelAuditSink, LogAuditSink};
pub use builder::{ConfigurationError, TlsMaterialBuilder};
pub use bundle::{
    HostnameVerifier, ProtocolPolicy, TlsMaterialBundle, cipher_suite_by_name,
    protocol_version_by_name,
};
pub use composite::CompositeValidator;
pub use dispatch::{ClientAuthDisabled, ClientAuthEnabled, ClientAuthMode};
pub use identity::{IdentityMaterial, IdentityProvider};
pub use store::{StoreBackedValidator, TrustStore};
pub use trust_all::UnsafeValidator;
