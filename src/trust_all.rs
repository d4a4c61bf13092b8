//! A validator that trusts everything.
//!
//! Only reachable through
//! [`crate::TlsMaterialBuilder::with_trusting_all_certificates_without_validation`]
//! or by constructing it explicitly. Meant for diagnostics and tests.

use rustls_pki_types::UnixTime;

use crate::api::{CertificateChain, CertificateValidator, Decision, PeerRole, RejectReason};
use crate::audit::AuditSink;

/// Accepts every non-empty certificate chain without looking at it.
///
/// Audit records for chains accepted this way read
/// `Accepting a <role> certificate: [...]` so that the bypass stands out
/// in logs.
#[derive(Debug, Default)]
pub struct UnsafeValidator;

impl UnsafeValidator {
    /// Validate `chain` outside a composite, writing one audit record to
    /// `audit`.
    pub fn validate(
        &self,
        chain: &CertificateChain,
        role: PeerRole,
        audit: &dyn AuditSink,
    ) -> Decision {
        crate::composite::audited(self, chain, &chain.subject(), role, UnixTime::now(), audit)
    }
}

impl CertificateValidator for UnsafeValidator {
    fn name(&self) -> &str {
        "trust-all-without-validation"
    }

    fn evaluate(&self, chain: &CertificateChain, _: PeerRole, _: UnixTime) -> Decision {
        if chain.is_empty() {
            Decision::reject(RejectReason::EmptyChain)
        } else {
            Decision::Accept
        }
    }

    fn bypasses_validation(&self) -> bool {
        true
    }

    #[cfg(feature = "diag")]
    fn diag(&self) -> Option<String> {
        Some("<li><b>All certificates trusted without validation</b></li>\n".into())
    }
}
