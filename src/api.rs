//! API for certificate validators.
//!
//! Every source of trust is expressed as an implementation of
//! [`CertificateValidator`]. The crate supplies three: one backed by a
//! [`crate::TrustStore`], one that accepts everything for diagnostics, and
//! the [`crate::CompositeValidator`] which merges any number of the others.
//! Callers may supply their own implementations, for example to pin
//! certificates by fingerprint:
//!
//! ```
//! use tls_material::api::{CertificateChain, CertificateValidator, Decision, PeerRole, RejectReason};
//! use tls_material::api::rustls_pki_types::UnixTime;
//!
//! #[derive(Debug)]
//! struct PinnedLeaf(Vec<u8>);
//!
//! impl CertificateValidator for PinnedLeaf {
//!     fn name(&self) -> &str {
//!         "pinned leaf"
//!     }
//!
//!     fn evaluate(&self, chain: &CertificateChain, _: PeerRole, _: UnixTime) -> Decision {
//!         match chain.leaf() {
//!             Some(leaf) if leaf.as_ref() == self.0.as_slice() => Decision::Accept,
//!             Some(_) => Decision::reject(RejectReason::NoPathFound),
//!             None => Decision::reject(RejectReason::EmptyChain),
//!         }
//!     }
//! }
//! ```
//!
//! Validators never log by themselves: audit records are written by the
//! [`crate::CompositeValidator`] around every delegate it calls, so that no
//! implementation can forget to.

use rustls::DistinguishedName;
use rustls_pki_types::{CertificateDer, UnixTime};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

pub use rustls;
pub use rustls_pki_types;
pub use x509_parser;

/// Which side of the handshake presented the certificate being validated.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum PeerRole {
    /// The remote peer is a server; we are the client.
    Server,
    /// The remote peer is a client authenticating to us.
    Client,
}

impl PeerRole {
    /// Lower-case name used in audit output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
        }
    }
}

impl std::fmt::Display for PeerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a validator declined a certificate chain.
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
pub enum RejectReason {
    /// The peer presented no certificates at all.
    #[error("empty certificate chain")]
    EmptyChain,
    /// The leaf certificate could not be parsed.
    #[error("malformed certificate")]
    Malformed,
    /// No path to a trusted certificate could be built.
    #[error("no certification path to a trusted certificate")]
    NoPathFound,
    /// A certificate in the path is past its notAfter.
    #[error("certificate expired")]
    Expired,
    /// A certificate in the path is before its notBefore.
    #[error("certificate not yet valid")]
    NotYetValid,
    /// A signature in the path does not verify.
    #[error("invalid signature")]
    SignatureInvalid,
    /// The composite validator has no delegates to ask.
    #[error("no validators configured")]
    NoDelegates,
}

/// Verdict from [`CertificateValidator::evaluate`].
///
/// Rejection is a routine outcome and therefore a value, not an error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    /// The chain is trusted.
    Accept,
    /// The chain is not trusted, for these reasons.
    Reject(BTreeSet<RejectReason>),
}

impl Decision {
    /// Rejection with a single reason.
    pub fn reject(reason: RejectReason) -> Self {
        Self::Reject(BTreeSet::from([reason]))
    }

    /// True for [`Decision::Accept`].
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }

    /// Rejection reasons; empty when accepted.
    pub fn reasons(&self) -> impl Iterator<Item = RejectReason> + '_ {
        match self {
            Self::Accept => None,
            Self::Reject(reasons) => Some(reasons.iter().copied()),
        }
        .into_iter()
        .flatten()
    }
}

/// A certificate chain presented by a peer, leaf first. Immutable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CertificateChain(Arc<[CertificateDer<'static>]>);

impl CertificateChain {
    /// Wrap the certificates received from a peer, leaf first.
    pub fn new(certs: impl IntoIterator<Item = CertificateDer<'static>>) -> Self {
        Self(certs.into_iter().collect())
    }

    /// Copy the borrowed certificates handed to a rustls verifier callback.
    pub fn from_handshake(
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
    ) -> Self {
        Self::new(
            std::iter::once(end_entity)
                .chain(intermediates)
                .map(|c| c.clone().into_owned()),
        )
    }

    /// The leaf (end-entity) certificate, if any.
    pub fn leaf(&self) -> Option<&CertificateDer<'static>> {
        self.0.first()
    }

    /// Everything after the leaf.
    pub fn intermediates(&self) -> &[CertificateDer<'static>] {
        self.0.get(1..).unwrap_or_default()
    }

    /// All certificates, leaf first.
    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.0
    }

    /// Number of certificates in the chain.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the peer presented nothing.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Subject distinguished name of the leaf, e.g.
    /// `CN=Hakan, OU=Amsterdam, O=Thunderberry, C=NL`. Empty for an empty
    /// chain and `<unparseable>` if the leaf is not valid X.509.
    pub fn subject(&self) -> String {
        match self.leaf() {
            None => String::new(),
            Some(der) => X509Certificate::from_der(der.as_ref())
                .map(|(_, cert)| cert.subject().to_string())
                .unwrap_or_else(|_| "<unparseable>".into()),
        }
    }
}

/// A source of trust decisions.
///
/// `evaluate` must not write audit records: [`crate::CompositeValidator`]
/// calls every delegate on every handshake and writes the audit record
/// itself. A nested composite audits its own delegates to its own sink. Implementations are shared between concurrent handshakes.
pub trait CertificateValidator: Send + Sync + std::fmt::Debug {
    /// Audit identity of this validator, such as the label of its store.
    fn name(&self) -> &str;

    /// Decide whether `chain`, presented by a peer in `role`, is trusted
    /// at time `now`.
    fn evaluate(&self, chain: &CertificateChain, role: PeerRole, now: UnixTime) -> Decision;

    /// True if this validator accepts without looking. Accepted chains are
    /// then audited with the distinct "Accepting" marker.
    fn bypasses_validation(&self) -> bool {
        false
    }

    /// Names of the trust anchors this validator accepts, offered to peers
    /// as a hint for selecting their identity.
    fn root_hint_subjects(&self) -> Vec<DistinguishedName> {
        Vec::new()
    }

    /// Produce diagnostic output about this validator in HTML format. The
    /// output will be rendered inside a `<ul>` block alongside others.
    fn diag(&self) -> Option<String> {
        None
    }
}
