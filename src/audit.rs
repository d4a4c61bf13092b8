//! Audit trail of trust decisions.
//!
//! [`crate::CompositeValidator`] emits one [`AuditRecord`] for every
//! delegate on every validation, before computing the aggregate verdict.
//! Records go to an [`AuditSink`]. Sinks serialize their own writes and
//! may fail, but a failing sink never fails or blocks validation: the
//! error is counted and the record is dropped.
//!
//! Record text is meant for people and log scrapers. Chains accepted
//! without validation read `Accepting a server certificate: [...]`;
//! everything else reads `Received the following server certificate: [...]`.

use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::api::{Decision, PeerRole, RejectReason};

/// Log target used by [`LogAuditSink`].
pub const AUDIT_TARGET: &str = "tls_material::audit";

/// One delegate's verdict on one presented chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuditRecord {
    /// [`crate::api::CertificateValidator::name`] of the delegate.
    pub validator: String,
    /// Which side presented the chain.
    pub role: PeerRole,
    /// Subject of the leaf certificate.
    pub subject: String,
    /// The delegate's verdict.
    pub decision: Decision,
    /// The delegate accepts without validating.
    pub unvalidated: bool,
}

impl AuditRecord {
    /// True if this record is the "Accepting" kind that marks a bypass.
    pub fn is_unvalidated_accept(&self) -> bool {
        self.unvalidated && self.decision.is_accept()
    }
}

impl fmt::Display for AuditRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unvalidated_accept() {
            write!(f, "Accepting a {} certificate: [{}]", self.role, self.subject)
        } else {
            write!(
                f,
                "Received the following {} certificate: [{}]",
                self.role, self.subject
            )
        }
    }
}

/// Something worth writing to the audit trail.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AuditEvent {
    /// A delegate decided on a chain.
    Decision(AuditRecord),
    /// A bundle was built that trusts every certificate.
    ValidationDisabled {
        /// Trust stores and validators that were supplied but are ignored.
        ignored_trust_sources: usize,
    },
}

/// Reasons an [`AuditSink`] could not take a record.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum AuditSinkError {
    /// The sink is at capacity.
    #[error("audit sink is full")]
    Full,
    /// The consumer of the sink has gone away.
    #[error("audit sink is closed")]
    Closed,
}

/// Destination for [`AuditEvent`]s. Must not block.
pub trait AuditSink: Send + Sync + fmt::Debug {
    /// Write one event.
    fn record(&self, event: &AuditEvent) -> Result<(), AuditSinkError>;
}

/// Writes audit events through the [`log`] facade.
#[derive(Debug, Default)]
pub struct LogAuditSink;

fn join_reasons(decision: &Decision) -> String {
    decision
        .reasons()
        .map(|r: RejectReason| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl AuditSink for LogAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        match event {
            AuditEvent::Decision(r) if r.decision.is_accept() => {
                log::debug!(target: AUDIT_TARGET, "{}", r);
            }
            AuditEvent::Decision(r) => {
                log::debug!(
                    target: AUDIT_TARGET,
                    "{}; rejected by {}: {}",
                    r,
                    r.validator,
                    join_reasons(&r.decision)
                );
            }
            AuditEvent::ValidationDisabled {
                ignored_trust_sources,
            } => {
                if *ignored_trust_sources > 0 {
                    log::warn!(
                        target: AUDIT_TARGET,
                        "Certificate validation is disabled: trusting all certificates without validation and ignoring {} configured trust source(s)",
                        ignored_trust_sources
                    );
                } else {
                    log::warn!(
                        target: AUDIT_TARGET,
                        "Certificate validation is disabled: trusting all certificates without validation"
                    );
                }
            }
        }
        Ok(())
    }
}

/// Hands audit events to another task over a bounded channel, for
/// shipping to an external audit store. When the channel is full the
/// event is dropped rather than stalling the handshake.
#[derive(Debug)]
pub struct ChannelAuditSink(mpsc::Sender<AuditEvent>);

impl ChannelAuditSink {
    /// Make a sink holding up to `capacity` undelivered events, and the
    /// receiver to drain it from.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self(tx), rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        self.0.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => AuditSinkError::Full,
            mpsc::error::TrySendError::Closed(_) => AuditSinkError::Closed,
        })
    }
}
