//! Assembling a [`TlsMaterialBundle`] from trust sources and an identity.
//!
//! ```
//! use tls_material::{TlsMaterialBuilder, TrustStore};
//!
//! # fn main() -> Result<(), tls_material::ConfigurationError> {
//! let builder = TlsMaterialBuilder::new().with_trust_store(TrustStore::new("empty", [])?);
//! let bundle = builder.build()?;
//! assert!(!bundle.validator().bypasses_validation());
//! # Ok(())
//! # }
//! ```

use rustls::crypto::CryptoProvider;
use rustls::{CipherSuite, SupportedProtocolVersion};
use std::sync::Arc;
use thiserror::Error;

use crate::api::CertificateValidator;
use crate::audit::{AuditEvent, AuditSink, LogAuditSink};
use crate::bundle::{HostnameVerifier, ProtocolPolicy, TlsMaterialBundle};
use crate::composite::CompositeValidator;
use crate::identity::{IdentityMaterial, IdentityProvider};
use crate::store::{StoreBackedValidator, TrustStore};
use crate::trust_all::UnsafeValidator;

/// Why a [`TlsMaterialBundle`] could not be built.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Neither a trust source nor trust-all was configured.
    #[error("No trust material configured: add a trust store or explicitly trust all certificates")]
    NoTrustMaterial,
    /// The identity certificate does not belong to the private key.
    #[error("Identity certificate does not match its private key")]
    IdentityKeyMismatch,
    /// Certificate or key bytes could not be parsed.
    #[error("Invalid certificate or key data: {0}")]
    InvalidStoreData(String),
    /// More than one identity was supplied.
    #[error("Only one identity may be configured")]
    DuplicateIdentityMaterial,
    /// The protocol versions and cipher suites cannot be satisfied.
    #[error("Invalid protocol policy: {0}")]
    InvalidProtocolPolicy(String),
}

#[derive(Clone, Debug)]
enum TrustSource {
    Store(TrustStore),
    Validator(Arc<dyn CertificateValidator>),
}

/// Accumulates trust sources, identity and policy, then produces
/// immutable [`TlsMaterialBundle`]s.
///
/// Each `with_*` method returns the updated builder; the builder itself
/// is never consumed by [`build`](Self::build), which can be called again
/// to get an independent bundle.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterialBuilder {
    trust: Vec<TrustSource>,
    identities: Vec<IdentityMaterial>,
    trust_all: bool,
    protocols: Option<Vec<&'static SupportedProtocolVersion>>,
    cipher_suites: Option<Vec<CipherSuite>>,
    hostname_verifier: HostnameVerifier,
    audit: Option<Arc<dyn AuditSink>>,
    crypto_provider: Option<Arc<CryptoProvider>>,
}

impl TlsMaterialBuilder {
    /// An empty builder. Building it as is fails with
    /// [`ConfigurationError::NoTrustMaterial`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust chains that validate against `store`. Stores are consulted in
    /// the order they were added.
    pub fn with_trust_store(mut self, store: TrustStore) -> Self {
        self.trust.push(TrustSource::Store(store));
        self
    }

    /// Add a custom validator as a trust source.
    pub fn with_validator(mut self, validator: Arc<dyn CertificateValidator>) -> Self {
        self.trust.push(TrustSource::Validator(validator));
        self
    }

    /// Present `material` as the local identity.
    pub fn with_identity_material(mut self, material: IdentityMaterial) -> Self {
        self.identities.push(material);
        self
    }

    /// Accept every peer certificate without validation.
    ///
    /// All trust stores and validators added to this builder are ignored
    /// while this is set. A warning is written to the audit sink every time
    /// a bundle is built. Hostname verification is unaffected.
    pub fn with_trusting_all_certificates_without_validation(mut self) -> Self {
        self.trust_all = true;
        self
    }

    /// Restrict the allowed protocol versions.
    pub fn with_protocols(mut self, versions: &[&'static SupportedProtocolVersion]) -> Self {
        self.protocols = Some(versions.to_vec());
        self
    }

    /// Restrict the allowed cipher suites, in preference order.
    pub fn with_cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.cipher_suites = Some(suites.to_vec());
        self
    }

    /// Accept any server hostname.
    pub fn with_unsafe_hostname_verifier(mut self) -> Self {
        self.hostname_verifier = HostnameVerifier::Disabled;
        self
    }

    /// Where to write audit records. Defaults to [`LogAuditSink`].
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Crypto provider for signatures and key loading. Defaults to
    /// [`crate::crypto_provider::default_crypto_provider`].
    pub fn with_crypto_provider(mut self, crypto_provider: Arc<CryptoProvider>) -> Self {
        self.crypto_provider = Some(crypto_provider);
        self
    }

    /// Produce a bundle from the current configuration.
    pub fn build(&self) -> Result<TlsMaterialBundle, ConfigurationError> {
        if self.identities.len() > 1 {
            return Err(ConfigurationError::DuplicateIdentityMaterial);
        }
        let crypto_provider = self
            .crypto_provider
            .clone()
            .unwrap_or_else(crate::crypto_provider::default_crypto_provider);
        let delegates = if self.trust_all {
            vec![Arc::new(UnsafeValidator) as Arc<dyn CertificateValidator>]
        } else {
            self.trust
                .iter()
                .map(|source| match source {
                    TrustSource::Store(store) => Arc::new(StoreBackedValidator::new(
                        store.clone(),
                        crypto_provider.signature_verification_algorithms,
                    )) as Arc<dyn CertificateValidator>,
                    TrustSource::Validator(v) => Arc::clone(v),
                })
                .collect::<Vec<_>>()
        };
        if delegates.is_empty() {
            return Err(ConfigurationError::NoTrustMaterial);
        }
        let identity = self
            .identities
            .first()
            .map(|m| IdentityProvider::load(m.clone(), &crypto_provider))
            .transpose()?
            .map(Arc::new);
        let protocols = ProtocolPolicy::resolve(
            &crypto_provider,
            self.protocols.as_deref(),
            self.cipher_suites.as_deref(),
        )?;
        let audit = self
            .audit
            .clone()
            .unwrap_or_else(|| Arc::new(LogAuditSink));
        let validator = Arc::new(CompositeValidator::new(delegates, audit));
        let bundle = TlsMaterialBundle::new(
            Arc::clone(&validator),
            identity,
            protocols,
            self.hostname_verifier,
            crypto_provider,
        )?;
        if self.trust_all {
            validator.write(AuditEvent::ValidationDisabled {
                ignored_trust_sources: self.trust.len(),
            });
        }
        #[cfg(feature = "metrics")]
        metrics::update(&bundle);
        Ok(bundle)
    }
}

#[cfg(feature = "metrics")]
mod metrics {
    use num::NumCast;

    use crate::composite::metrics::IDENTITY_EXPIRATION;

    pub(super) fn update(bundle: &super::TlsMaterialBundle) {
        let Some(exp) = bundle
            .identity()
            .and_then(|i| i.valid_until())
            .and_then(|exp| <f64 as NumCast>::from(exp.unix_timestamp()))
        else {
            return;
        };
        let current = IDENTITY_EXPIRATION.get();
        if current == 0.0 || exp < current {
            IDENTITY_EXPIRATION.set(exp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CertificateChain, Decision, PeerRole};
    use crate::audit::AuditRecord;
    use crate::testdata::{self, RecordingSink};

    fn hakan_chain() -> CertificateChain {
        CertificateChain::new([testdata::Ca::thunderberry().hakan().cert.clone()])
    }

    fn black_hole_chain() -> CertificateChain {
        CertificateChain::new([testdata::black_hole().cert.clone()])
    }

    fn summary(records: &[AuditRecord]) -> Vec<(String, PeerRole, String, bool)> {
        records
            .iter()
            .map(|r| {
                (
                    r.validator.clone(),
                    r.role,
                    r.subject.clone(),
                    r.decision.is_accept(),
                )
            })
            .collect()
    }

    #[test]
    fn no_trust_material() {
        assert!(matches!(
            TlsMaterialBuilder::new().build(),
            Err(ConfigurationError::NoTrustMaterial)
        ));
        let hakan = testdata::Ca::thunderberry().hakan();
        assert!(matches!(
            TlsMaterialBuilder::new()
                .with_identity_material(hakan.material())
                .build(),
            Err(ConfigurationError::NoTrustMaterial)
        ));
    }

    #[test]
    fn empty_store_counts_as_trust_material() {
        let sink = RecordingSink::new();
        let bundle = TlsMaterialBuilder::new()
            .with_trust_store(TrustStore::new("empty", []).unwrap())
            .with_audit_sink(sink.clone())
            .build()
            .unwrap();
        assert!(!bundle.validator().validate(&hakan_chain(), PeerRole::Server).is_accept());
        assert_eq!(sink.records().len(), 1);
    }

    #[test]
    fn corporate_ca_scenario() {
        let ca = testdata::Ca::thunderberry();
        let sink = RecordingSink::new();
        let bundle = TlsMaterialBuilder::new()
            .with_trust_store(ca.store("corporate"))
            .with_audit_sink(sink.clone())
            .build()
            .unwrap();
        assert_eq!(
            bundle.validator().validate(&hakan_chain(), PeerRole::Server),
            Decision::Accept
        );
        assert!(!bundle
            .validator()
            .validate(&black_hole_chain(), PeerRole::Server)
            .is_accept());
        assert_eq!(
            summary(&sink.records()),
            vec![
                (
                    "corporate".to_string(),
                    PeerRole::Server,
                    "CN=Hakan, OU=Amsterdam, O=Thunderberry, C=NL".to_string(),
                    true
                ),
                (
                    "corporate".to_string(),
                    PeerRole::Server,
                    "CN=black-hole, OU=Altindag, O=Altindag, C=NL".to_string(),
                    false
                ),
            ]
        );
    }

    #[test]
    fn store_without_issuer_scenario() {
        let sink = RecordingSink::new();
        let bundle = TlsMaterialBuilder::new()
            .with_trust_store(testdata::Ca::new("Elsewhere Root CA").store("elsewhere"))
            .with_audit_sink(sink.clone())
            .build()
            .unwrap();
        assert_eq!(
            bundle.validator().validate(&hakan_chain(), PeerRole::Server),
            Decision::reject(crate::api::RejectReason::NoPathFound)
        );
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].to_string(),
            "Received the following server certificate: [CN=Hakan, OU=Amsterdam, O=Thunderberry, C=NL]"
        );
    }

    #[test]
    fn two_stores_scenario() {
        let ca = testdata::Ca::thunderberry();
        let black_hole = testdata::black_hole();
        let sink = RecordingSink::new();
        let bundle = TlsMaterialBuilder::new()
            .with_trust_store(ca.store("corporate"))
            .with_trust_store(TrustStore::new("pinned", [black_hole.cert.clone()]).unwrap())
            .with_audit_sink(sink.clone())
            .build()
            .unwrap();
        assert!(bundle.validator().validate(&hakan_chain(), PeerRole::Server).is_accept());
        assert!(bundle.validator().validate(&black_hole_chain(), PeerRole::Client).is_accept());
        let records = sink.records();
        assert_eq!(records.len(), 4);
        assert_eq!(
            records
                .iter()
                .map(|r| (r.validator.as_str(), r.decision.is_accept()))
                .collect::<Vec<_>>(),
            vec![
                ("corporate", true),
                ("pinned", false),
                ("corporate", false),
                ("pinned", true)
            ]
        );
        assert_eq!(bundle.root_hint_subjects().len(), 2);
    }

    #[test]
    fn trust_all_scenario() {
        let ca = testdata::Ca::thunderberry();
        let sink = RecordingSink::new();
        let bundle = TlsMaterialBuilder::new()
            .with_trust_store(ca.store("corporate"))
            .with_trusting_all_certificates_without_validation()
            .with_audit_sink(sink.clone())
            .build()
            .unwrap();
        assert_eq!(
            sink.events(),
            vec![AuditEvent::ValidationDisabled {
                ignored_trust_sources: 1
            }]
        );
        assert!(bundle.validator().bypasses_validation());
        assert_eq!(bundle.validator().delegates().len(), 1);
        assert!(bundle.validator().validate(&black_hole_chain(), PeerRole::Server).is_accept());
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].to_string(),
            "Accepting a server certificate: [CN=black-hole, OU=Altindag, O=Altindag, C=NL]"
        );
        assert_eq!(bundle.hostname_verifier(), HostnameVerifier::Strict);
        assert!(bundle.root_hint_subjects().is_empty());
    }

    #[test]
    fn identity_is_loaded() {
        let ca = testdata::Ca::thunderberry();
        let hakan = ca.hakan();
        let bundle = TlsMaterialBuilder::new()
            .with_trust_store(ca.store("corporate"))
            .with_identity_material(hakan.material())
            .build()
            .unwrap();
        let identity = bundle.identity().expect("identity");
        assert_eq!(identity.subject(), "CN=Hakan, OU=Amsterdam, O=Thunderberry, C=NL");
        assert_eq!(identity.certificate_chain(), &[hakan.cert.clone()]);
    }

    #[test]
    fn duplicate_identity() {
        let ca = testdata::Ca::thunderberry();
        let hakan = ca.hakan();
        assert!(matches!(
            TlsMaterialBuilder::new()
                .with_trust_store(ca.store("corporate"))
                .with_identity_material(hakan.material())
                .with_identity_material(hakan.material())
                .build(),
            Err(ConfigurationError::DuplicateIdentityMaterial)
        ));
    }

    #[test]
    fn mismatched_identity() {
        let ca = testdata::Ca::thunderberry();
        let hakan = ca.hakan();
        let black_hole = testdata::black_hole();
        let sink = RecordingSink::new();
        assert!(matches!(
            TlsMaterialBuilder::new()
                .with_trusting_all_certificates_without_validation()
                .with_identity_material(IdentityMaterial::new(
                    black_hole.key(),
                    vec![hakan.cert.clone()]
                ))
                .with_audit_sink(sink.clone())
                .build(),
            Err(ConfigurationError::IdentityKeyMismatch)
        ));
        assert!(sink.events().is_empty());
    }

    #[test]
    fn builder_is_reusable() {
        let ca = testdata::Ca::thunderberry();
        let builder = TlsMaterialBuilder::new().with_trust_store(ca.store("corporate"));
        let first = builder.build().unwrap();
        let extended = builder
            .clone()
            .with_trust_store(TrustStore::new("pinned", [testdata::black_hole().cert.clone()]).unwrap());
        let second = extended.build().unwrap();
        assert_eq!(first.validator().delegates().len(), 1);
        assert_eq!(second.validator().delegates().len(), 2);
        assert!(!first.validator().validate(&black_hole_chain(), PeerRole::Server).is_accept());
        assert!(second.validator().validate(&black_hole_chain(), PeerRole::Server).is_accept());
        assert_eq!(builder.build().unwrap().validator().delegates().len(), 1);
    }

    #[test]
    fn custom_validator() {
        let sink = RecordingSink::new();
        let bundle = TlsMaterialBuilder::new()
            .with_validator(Arc::new(UnsafeValidator))
            .with_audit_sink(sink.clone())
            .build()
            .unwrap();
        assert!(bundle.validator().validate(&hakan_chain(), PeerRole::Client).is_accept());
        assert!(sink.events().iter().all(|e| matches!(e, AuditEvent::Decision(_))));
    }

    #[test]
    fn protocol_policy() {
        let ca = testdata::Ca::thunderberry();
        let bundle = TlsMaterialBuilder::new()
            .with_trust_store(ca.store("corporate"))
            .with_protocols(&[&rustls::version::TLS13])
            .build()
            .unwrap();
        assert_eq!(bundle.protocols().protocol_names(), vec!["TLSv1.3"]);
        assert!(matches!(
            TlsMaterialBuilder::new()
                .with_trust_store(ca.store("corporate"))
                .with_protocols(&[])
                .build(),
            Err(ConfigurationError::InvalidProtocolPolicy(_))
        ));
    }

    #[test]
    fn unsafe_hostname_verifier() {
        let ca = testdata::Ca::thunderberry();
        let bundle = TlsMaterialBuilder::new()
            .with_trust_store(ca.store("corporate"))
            .with_unsafe_hostname_verifier()
            .build()
            .unwrap();
        assert_eq!(bundle.hostname_verifier(), HostnameVerifier::Disabled);
        assert!(bundle.hostname_verifier().verify("example.com", &hakan_chain()));
    }
}
