//! Certificates and a recording audit sink for tests.

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair,
};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::sync::{Arc, LazyLock, Mutex, OnceLock};

use crate::audit::{AuditEvent, AuditRecord, AuditSink, AuditSinkError};
use crate::identity::IdentityMaterial;
use crate::store::TrustStore;

pub(crate) const THUNDERBERRY_CA: &str = "Thunderberry Root CA";

static THUNDERBERRY: LazyLock<Ca> = LazyLock::new(|| Ca::new(THUNDERBERRY_CA));

static BLACK_HOLE: LazyLock<Issued> = LazyLock::new(|| {
    let mut params = leaf_params("black-hole", "Altindag", "Altindag");
    params.is_ca = IsCa::NoCa;
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    Issued::new(cert, &key)
});

/// A certificate with its private key.
pub(crate) struct Issued {
    pub(crate) cert: CertificateDer<'static>,
    pub(crate) cert_pem: String,
    pub(crate) key_pem: String,
    key_der: Vec<u8>,
}

impl Issued {
    fn new(cert: rcgen::Certificate, key: &KeyPair) -> Self {
        Self {
            cert: cert.der().clone(),
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            key_der: key.serialize_der(),
        }
    }

    pub(crate) fn key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()))
    }

    pub(crate) fn material(&self) -> IdentityMaterial {
        IdentityMaterial::new(self.key(), vec![self.cert.clone()])
    }
}

/// Self-signed `CN=black-hole, OU=Altindag, O=Altindag, C=NL`, valid for
/// `localhost`.
pub(crate) fn black_hole() -> &'static Issued {
    &BLACK_HOLE
}

fn leaf_params(cn: &str, ou: &str, o: &str) -> CertificateParams {
    let mut params = CertificateParams::new(vec!["localhost".into()]).unwrap();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, cn);
    dn.push(DnType::OrganizationalUnitName, ou);
    dn.push(DnType::OrganizationName, o);
    dn.push(DnType::CountryName, "NL");
    params.distinguished_name = dn;
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    params
}

fn ca_params(name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, name);
    dn.push(DnType::OrganizationName, "Thunderberry");
    dn.push(DnType::CountryName, "NL");
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
}

/// A certificate authority able to issue more certificates.
pub(crate) struct Ca {
    pub(crate) cert: CertificateDer<'static>,
    pub(crate) cert_pem: String,
    params: CertificateParams,
    key_pem: String,
    hakan: OnceLock<Issued>,
}

impl Ca {
    /// A fresh self-signed root, `CN=<name>, O=Thunderberry, C=NL`.
    pub(crate) fn new(name: &str) -> Self {
        let params = ca_params(name);
        let key = KeyPair::generate().unwrap();
        let cert = params.clone().self_signed(&key).unwrap();
        Self::from_parts(cert, params, &key)
    }

    /// The shared corporate root every test agrees on.
    pub(crate) fn thunderberry() -> &'static Ca {
        &THUNDERBERRY
    }

    fn from_parts(cert: rcgen::Certificate, params: CertificateParams, key: &KeyPair) -> Self {
        Self {
            cert: cert.der().clone(),
            cert_pem: cert.pem(),
            params,
            key_pem: key.serialize_pem(),
            hakan: OnceLock::new(),
        }
    }

    fn issuer(&self) -> Issuer<'static, KeyPair> {
        Issuer::new(
            self.params.clone(),
            KeyPair::from_pem(&self.key_pem).unwrap(),
        )
    }

    fn issue(&self, params: CertificateParams) -> Issued {
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.issuer()).unwrap();
        Issued::new(cert, &key)
    }

    pub(crate) fn store(&self, label: &str) -> TrustStore {
        TrustStore::new(label, [self.cert.clone()]).unwrap()
    }

    /// `CN=Hakan, OU=Amsterdam, O=Thunderberry, C=NL`, issued once per CA.
    pub(crate) fn hakan(&self) -> &Issued {
        self.hakan.get_or_init(|| self.leaf("Hakan"))
    }

    pub(crate) fn leaf(&self, cn: &str) -> Issued {
        self.issue(leaf_params(cn, "Amsterdam", "Thunderberry"))
    }

    pub(crate) fn intermediate(&self, name: &str) -> Ca {
        let params = ca_params(name);
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.issuer()).unwrap();
        Self::from_parts(cert, params, &key)
    }

    pub(crate) fn expired_leaf(&self) -> Issued {
        let mut params = leaf_params("Expired", "Amsterdam", "Thunderberry");
        params.not_before = rcgen::date_time_ymd(2000, 1, 1);
        params.not_after = rcgen::date_time_ymd(2001, 1, 1);
        self.issue(params)
    }

    pub(crate) fn future_leaf(&self) -> Issued {
        let mut params = leaf_params("Future", "Amsterdam", "Thunderberry");
        params.not_before = rcgen::date_time_ymd(2090, 1, 1);
        params.not_after = rcgen::date_time_ymd(2091, 1, 1);
        self.issue(params)
    }
}

/// Keeps every audit event in order.
#[derive(Debug, Default)]
pub(crate) struct RecordingSink(Mutex<Vec<AuditEvent>>);

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn events(&self) -> Vec<AuditEvent> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn records(&self) -> Vec<AuditRecord> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                AuditEvent::Decision(r) => Some(r),
                AuditEvent::ValidationDisabled { .. } => None,
            })
            .collect()
    }
}

impl AuditSink for RecordingSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditSinkError> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }
}
