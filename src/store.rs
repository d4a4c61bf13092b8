//! Trust stores and the validator backed by one.

use rustls::DistinguishedName;
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls_pki_types::{CertificateDer, TrustAnchor, UnixTime};
use std::collections::HashSet;
use std::sync::Arc;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::api::{CertificateChain, CertificateValidator, Decision, PeerRole, RejectReason};
use crate::audit::AuditSink;
use crate::builder::ConfigurationError;

#[derive(Clone)]
struct StoredCertificate {
    der: CertificateDer<'static>,
    subject: String,
    raw_subject: Vec<u8>,
    serial: Vec<u8>,
    not_before: i64,
    not_after: i64,
}

impl StoredCertificate {
    fn parse(der: CertificateDer<'static>) -> Result<Self, ConfigurationError> {
        let (_, cert) = X509Certificate::from_der(der.as_ref())
            .map_err(|e| ConfigurationError::InvalidStoreData(e.to_string()))?;
        let validity = cert.validity();
        Ok(Self {
            subject: cert.subject().to_string(),
            raw_subject: cert.subject().as_raw().to_vec(),
            serial: cert.raw_serial().to_vec(),
            not_before: validity.not_before.timestamp(),
            not_after: validity.not_after.timestamp(),
            der,
        })
    }

    fn check_validity(&self, now: UnixTime) -> Decision {
        let now = i64::try_from(now.as_secs()).unwrap_or(i64::MAX);
        if now < self.not_before {
            Decision::reject(RejectReason::NotYetValid)
        } else if now > self.not_after {
            Decision::reject(RejectReason::Expired)
        } else {
            Decision::Accept
        }
    }
}

struct TrustStoreInner {
    label: String,
    certs: Vec<StoredCertificate>,
    anchors: Vec<TrustAnchor<'static>>,
}

/// A read-only set of trusted certificates, unique by subject and serial
/// number.
///
/// Cheap to clone. The label is the store's identity in audit records and
/// diagnostics.
#[derive(Clone)]
pub struct TrustStore(Arc<TrustStoreInner>);

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore")
            .field("label", &self.0.label)
            .field(
                "subjects",
                &self.0.certs.iter().map(|c| &c.subject).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl TrustStore {
    /// Build a store from DER certificates. Duplicates (same subject and
    /// serial number) are kept once.
    pub fn new(
        label: impl Into<String>,
        certs: impl IntoIterator<Item = CertificateDer<'static>>,
    ) -> Result<Self, ConfigurationError> {
        let parsed = certs
            .into_iter()
            .map(StoredCertificate::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_parsed(label.into(), parsed)
    }

    /// Merge several stores, for example ones loaded from different files,
    /// into a single store with its own label.
    pub fn merged(
        label: impl Into<String>,
        stores: impl IntoIterator<Item = TrustStore>,
    ) -> Result<Self, ConfigurationError> {
        let certs = stores
            .into_iter()
            .flat_map(|s| s.0.certs.clone())
            .collect::<Vec<_>>();
        Self::from_parsed(label.into(), certs)
    }

    /// Build a store from a PEM bundle of certificates.
    #[cfg(feature = "files")]
    pub fn from_pem(label: impl Into<String>, pem: &[u8]) -> Result<Self, ConfigurationError> {
        let certs = rustls_pemfile::certs(&mut std::io::Cursor::new(pem))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConfigurationError::InvalidStoreData(e.to_string()))?;
        Self::new(label, certs)
    }

    fn from_parsed(
        label: String,
        parsed: Vec<StoredCertificate>,
    ) -> Result<Self, ConfigurationError> {
        let mut seen = HashSet::new();
        let certs = parsed
            .into_iter()
            .filter(|c| seen.insert((c.raw_subject.clone(), c.serial.clone())))
            .collect::<Vec<_>>();
        let anchors = certs
            .iter()
            .map(|c| {
                webpki::anchor_from_trusted_cert(&c.der)
                    .map(|ta| ta.to_owned())
                    .map_err(|e| ConfigurationError::InvalidStoreData(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if certs.is_empty() {
            log::warn!("Trust store {} contains no certificates", label);
        }
        Ok(Self(Arc::new(TrustStoreInner {
            label,
            certs,
            anchors,
        })))
    }

    /// The audit identity of this store.
    pub fn label(&self) -> &str {
        &self.0.label
    }

    /// Number of distinct certificates.
    pub fn len(&self) -> usize {
        self.0.certs.len()
    }

    /// True if the store trusts nothing.
    pub fn is_empty(&self) -> bool {
        self.0.certs.is_empty()
    }

    /// The trusted certificates.
    pub fn certificates(&self) -> impl Iterator<Item = &CertificateDer<'static>> {
        self.0.certs.iter().map(|c| &c.der)
    }

    /// Subject names of the trusted certificates, in text form.
    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.0.certs.iter().map(|c| c.subject.as_str())
    }

    fn pinned(&self, leaf: &CertificateDer<'_>) -> Option<&StoredCertificate> {
        self.0.certs.iter().find(|c| c.der.as_ref() == leaf.as_ref())
    }
}

fn reason_for(e: &webpki::Error) -> RejectReason {
    match e {
        webpki::Error::CertExpired { .. } => RejectReason::Expired,
        webpki::Error::CertNotValidYet { .. } => RejectReason::NotYetValid,
        webpki::Error::InvalidSignatureForPublicKey { .. } => RejectReason::SignatureInvalid,
        webpki::Error::BadDer { .. } => RejectReason::Malformed,
        _ => RejectReason::NoPathFound,
    }
}

/// Validates chains against the certificates of a single [`TrustStore`].
///
/// A chain is accepted if a path from its leaf to a certificate in the
/// store can be built in which every signature verifies and every
/// certificate is within its validity period, or if the leaf itself is
/// one of the store's certificates and is within its validity period.
#[derive(Debug)]
pub struct StoreBackedValidator {
    store: TrustStore,
    supported_algs: WebPkiSupportedAlgorithms,
}

impl StoreBackedValidator {
    /// Validate against `store` using the signature algorithms of a
    /// [`rustls::crypto::CryptoProvider`].
    pub fn new(store: TrustStore, supported_algs: WebPkiSupportedAlgorithms) -> Self {
        Self {
            store,
            supported_algs,
        }
    }

    /// The backing store.
    pub fn store(&self) -> &TrustStore {
        &self.store
    }

    /// Validate `chain` outside a composite as of now, writing one audit
    /// record to `audit`.
    pub fn validate(
        &self,
        chain: &CertificateChain,
        role: PeerRole,
        audit: &dyn AuditSink,
    ) -> Decision {
        crate::composite::audited(self, chain, &chain.subject(), role, UnixTime::now(), audit)
    }
}

impl CertificateValidator for StoreBackedValidator {
    fn name(&self) -> &str {
        self.store.label()
    }

    fn evaluate(&self, chain: &CertificateChain, role: PeerRole, now: UnixTime) -> Decision {
        let Some(leaf) = chain.leaf() else {
            return Decision::reject(RejectReason::EmptyChain);
        };
        if let Some(pinned) = self.store.pinned(leaf) {
            return pinned.check_validity(now);
        }
        let Ok(end_entity) = webpki::EndEntityCert::try_from(leaf) else {
            return Decision::reject(RejectReason::Malformed);
        };
        let usage = match role {
            PeerRole::Server => webpki::KeyUsage::server_auth(),
            PeerRole::Client => webpki::KeyUsage::client_auth(),
        };
        match end_entity.verify_for_usage(
            self.supported_algs.all,
            &self.store.0.anchors,
            chain.intermediates(),
            now,
            usage,
            None,
            None,
        ) {
            Ok(_) => Decision::Accept,
            Err(e) => Decision::reject(reason_for(&e)),
        }
    }

    fn root_hint_subjects(&self) -> Vec<DistinguishedName> {
        self.store
            .0
            .certs
            .iter()
            .map(|c| DistinguishedName::from(c.raw_subject.clone()))
            .collect()
    }

    #[cfg(feature = "diag")]
    fn diag(&self) -> Option<String> {
        let mut out = format!(
            "<li>Trust store <b>{}</b>: {} certificate(s)<ul>",
            html_escape::encode_text(self.store.label()),
            self.store.len()
        );
        for subject in self.store.subjects() {
            out.push_str(&format!("<li>{}</li>", html_escape::encode_text(subject)));
        }
        out.push_str("</ul></li>\n");
        Some(out)
    }
}
