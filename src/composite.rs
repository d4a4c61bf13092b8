//! The composite validator: any-accepts over an ordered set of delegates.
//!
//! Every delegate is asked about every chain, even after one of them has
//! accepted, and each answer is written to the audit sink before the
//! aggregate is computed. The audit trail therefore shows which trust
//! source actually accepted a connection, not merely that one did.

use rustls::DistinguishedName;
use rustls_pki_types::UnixTime;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::api::{CertificateChain, CertificateValidator, Decision, PeerRole, RejectReason};
use crate::audit::{AuditEvent, AuditRecord, AuditSink};

#[cfg(feature = "metrics")]
pub(crate) mod metrics {
    use lazy_static::lazy_static;
    use prometheus::{
        register_gauge, register_int_counter, register_int_counter_vec, Gauge, IntCounter,
        IntCounterVec,
    };

    lazy_static! {
        pub(crate) static ref VALIDATIONS: IntCounterVec = register_int_counter_vec!(
            "tls_material_validations_total",
            "Certificate chains validated by composite validators",
            &["role", "decision"]
        )
        .unwrap();
        pub(crate) static ref AUDIT_RECORDS_DROPPED: IntCounter = register_int_counter!(
            "tls_material_audit_records_dropped_total",
            "Audit records an audit sink failed to accept"
        )
        .unwrap();
        pub(crate) static ref IDENTITY_EXPIRATION: Gauge = register_gauge!(
            "tls_material_identity_valid_until",
            "Earliest expiration time of a configured TLS identity"
        )
        .unwrap();
    }
}

/// Merges delegates into one logical validator that accepts a chain iff at
/// least one delegate does.
///
/// With no delegates every chain is rejected.
#[derive(Debug)]
pub struct CompositeValidator {
    delegates: Vec<Arc<dyn CertificateValidator>>,
    audit: Arc<dyn AuditSink>,
}

impl CompositeValidator {
    /// Combine `delegates`, in order, writing audit records to `audit`.
    pub fn new(delegates: Vec<Arc<dyn CertificateValidator>>, audit: Arc<dyn AuditSink>) -> Self {
        Self { delegates, audit }
    }

    /// The delegates in evaluation order.
    pub fn delegates(&self) -> &[Arc<dyn CertificateValidator>] {
        &self.delegates
    }

    /// True if any delegate accepts without validating.
    pub fn bypasses_validation(&self) -> bool {
        self.delegates.iter().any(|d| d.bypasses_validation())
    }

    /// Validate `chain` presented by a peer in `role` as of now.
    pub fn validate(&self, chain: &CertificateChain, role: PeerRole) -> Decision {
        self.validate_at(chain, role, UnixTime::now())
    }

    /// Validate `chain` presented by a peer in `role` as of `now`, writing
    /// one audit record per delegate.
    pub fn validate_at(&self, chain: &CertificateChain, role: PeerRole, now: UnixTime) -> Decision {
        let subject = chain.subject();
        let verdicts = self
            .delegates
            .iter()
            .map(|d| audited(d.as_ref(), chain, &subject, role, now, self.audit.as_ref()))
            .collect::<Vec<_>>();
        let decision = aggregate(verdicts);
        #[cfg(feature = "metrics")]
        metrics::VALIDATIONS
            .with_label_values(&[
                role.as_str(),
                if decision.is_accept() { "accept" } else { "reject" },
            ])
            .inc();
        decision
    }

    pub(crate) fn write(&self, event: AuditEvent) {
        write(self.audit.as_ref(), event)
    }
}

fn write(audit: &dyn AuditSink, event: AuditEvent) {
    if let Err(_e) = audit.record(&event) {
        #[cfg(feature = "metrics")]
        metrics::AUDIT_RECORDS_DROPPED.inc();
    }
}

/// Evaluate one validator and write its record to `audit`.
pub(crate) fn audited(
    validator: &dyn CertificateValidator,
    chain: &CertificateChain,
    subject: &str,
    role: PeerRole,
    now: UnixTime,
    audit: &dyn AuditSink,
) -> Decision {
    let decision = validator.evaluate(chain, role, now);
    write(
        audit,
        AuditEvent::Decision(AuditRecord {
            validator: validator.name().to_owned(),
            role,
            subject: subject.to_owned(),
            decision: decision.clone(),
            unvalidated: validator.bypasses_validation(),
        }),
    );
    decision
}

// Collects every verdict before deciding; callers rely on no delegate
// being skipped.
fn aggregate(verdicts: impl IntoIterator<Item = Decision>) -> Decision {
    let mut accepted = false;
    let mut reasons = BTreeSet::new();
    let mut any = false;
    for verdict in verdicts {
        any = true;
        match verdict {
            Decision::Accept => accepted = true,
            Decision::Reject(r) => reasons.extend(r),
        }
    }
    if accepted {
        Decision::Accept
    } else if !any {
        Decision::reject(RejectReason::NoDelegates)
    } else {
        Decision::Reject(reasons)
    }
}

impl CertificateValidator for CompositeValidator {
    fn name(&self) -> &str {
        "composite"
    }

    /// Nested use: the outer composite audits this composite as a single
    /// delegate, and this composite audits its own delegates to its own
    /// sink.
    fn evaluate(&self, chain: &CertificateChain, role: PeerRole, now: UnixTime) -> Decision {
        self.validate_at(chain, role, now)
    }

    fn bypasses_validation(&self) -> bool {
        CompositeValidator::bypasses_validation(self)
    }

    fn root_hint_subjects(&self) -> Vec<DistinguishedName> {
        let mut seen = BTreeSet::new();
        self.delegates
            .iter()
            .flat_map(|d| d.root_hint_subjects())
            .filter(|dn| seen.insert(dn.as_ref().to_vec()))
            .collect()
    }

    fn diag(&self) -> Option<String> {
        let mut out = format!("<li>Any of {} validator(s)<ul>", self.delegates.len());
        for d in &self.delegates {
            out.push_str(
                &d.diag()
                    .unwrap_or_else(|| "<li><i>Diagnostic output not supported</i></li>\n".into()),
            );
        }
        out.push_str("</ul></li>\n");
        Some(out)
    }
}
