//! The finished, immutable TLS material bundle.
//!
//! A [`TlsMaterialBundle`] is what transport adapters consume. It exposes
//! the composite validator, the optional local identity, the allowed
//! protocol versions and cipher suites, and a hostname verification
//! predicate. Nothing in it can be changed after
//! [`crate::TlsMaterialBuilder::build`]; to trust something new, build a
//! new bundle.

use rustls::client::verify_server_name;
use rustls::crypto::CryptoProvider;
use rustls::server::{ParsedCertificate, ServerSessionMemoryCache, StoresServerSessions};
use rustls::{
    CipherSuite, ClientConfig, ConfigBuilder, DistinguishedName, ProtocolVersion, ServerConfig,
    SupportedCipherSuite, SupportedProtocolVersion, WantsVerifier,
};
use rustls_pki_types::ServerName;
use std::sync::Arc;

use crate::api::{CertificateChain, CertificateValidator};
use crate::builder::ConfigurationError;
use crate::composite::CompositeValidator;
use crate::identity::IdentityProvider;

/// Look up a protocol version by its conventional name, `TLSv1.2` or
/// `TLSv1.3`.
pub fn protocol_version_by_name(name: &str) -> Option<&'static SupportedProtocolVersion> {
    rustls::ALL_VERSIONS
        .iter()
        .copied()
        .find(|v| protocol_name(v) == Some(name))
}

fn protocol_name(v: &SupportedProtocolVersion) -> Option<&'static str> {
    match v.version {
        ProtocolVersion::TLSv1_2 => Some("TLSv1.2"),
        ProtocolVersion::TLSv1_3 => Some("TLSv1.3"),
        _ => None,
    }
}

/// Look up a cipher suite offered by `provider` by its rustls name, such
/// as `TLS13_AES_256_GCM_SHA384`.
pub fn cipher_suite_by_name(provider: &CryptoProvider, name: &str) -> Option<CipherSuite> {
    provider
        .cipher_suites
        .iter()
        .map(|s| s.suite())
        .find(|s| format!("{:?}", s) == name)
}

/// Allowed protocol versions and cipher suites.
#[derive(Clone, Debug)]
pub struct ProtocolPolicy {
    versions: Vec<&'static SupportedProtocolVersion>,
    cipher_suites: Vec<SupportedCipherSuite>,
}

impl ProtocolPolicy {
    /// Narrow the defaults of `provider` to the requested versions and
    /// suites. `None` means the rustls safe defaults.
    pub(crate) fn resolve(
        provider: &CryptoProvider,
        versions: Option<&[&'static SupportedProtocolVersion]>,
        cipher_suites: Option<&[CipherSuite]>,
    ) -> Result<Self, ConfigurationError> {
        let versions = versions
            .map(<[_]>::to_vec)
            .unwrap_or_else(|| rustls::DEFAULT_VERSIONS.to_vec());
        if versions.is_empty() {
            return Err(ConfigurationError::InvalidProtocolPolicy(
                "no protocol versions allowed".into(),
            ));
        }
        let cipher_suites = match cipher_suites {
            None => provider.cipher_suites.clone(),
            Some(wanted) => wanted
                .iter()
                .map(|cs| {
                    provider
                        .cipher_suites
                        .iter()
                        .find(|s| s.suite() == *cs)
                        .copied()
                        .ok_or_else(|| {
                            ConfigurationError::InvalidProtocolPolicy(format!(
                                "cipher suite {:?} is not supported by the crypto provider",
                                cs
                            ))
                        })
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        let usable = cipher_suites
            .iter()
            .any(|s| versions.iter().any(|v| v.version == s.version().version));
        if !usable {
            return Err(ConfigurationError::InvalidProtocolPolicy(
                "no allowed cipher suite is usable with the allowed protocol versions".into(),
            ));
        }
        Ok(Self {
            versions,
            cipher_suites,
        })
    }

    /// Allowed protocol versions.
    pub fn versions(&self) -> &[&'static SupportedProtocolVersion] {
        &self.versions
    }

    /// Allowed cipher suites, in preference order.
    pub fn cipher_suites(&self) -> &[SupportedCipherSuite] {
        &self.cipher_suites
    }

    /// Allowed protocol versions by name, for transports configured with
    /// strings.
    pub fn protocol_names(&self) -> Vec<&'static str> {
        self.versions.iter().filter_map(|v| protocol_name(v)).collect()
    }

    /// Allowed cipher suites by rustls name.
    pub fn cipher_suite_names(&self) -> Vec<String> {
        self.cipher_suites
            .iter()
            .map(|s| format!("{:?}", s.suite()))
            .collect()
    }
}

/// Hostname verification policy: whether a presented chain must name the
/// host we meant to reach.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum HostnameVerifier {
    /// The leaf certificate's subject alternative names must match.
    #[default]
    Strict,
    /// Any hostname is accepted.
    Disabled,
}

impl HostnameVerifier {
    /// Does `chain` identify `hostname`?
    pub fn verify(&self, hostname: &str, chain: &CertificateChain) -> bool {
        match ServerName::try_from(hostname) {
            Ok(server_name) => self.verify_server_name(&server_name, chain),
            Err(_) => *self == Self::Disabled,
        }
    }

    /// Does `chain` identify `server_name`?
    pub fn verify_server_name(&self, server_name: &ServerName<'_>, chain: &CertificateChain) -> bool {
        match self {
            Self::Disabled => true,
            Self::Strict => chain
                .leaf()
                .and_then(|leaf| ParsedCertificate::try_from(leaf).ok())
                .map(|parsed| verify_server_name(&parsed, server_name).is_ok())
                .unwrap_or(false),
        }
    }
}

#[derive(Debug)]
pub(crate) struct BundleInner {
    pub(crate) validator: Arc<CompositeValidator>,
    pub(crate) identity: Option<Arc<IdentityProvider>>,
    pub(crate) hostname_verifier: HostnameVerifier,
    pub(crate) crypto_provider: Arc<CryptoProvider>,
    pub(crate) root_hint_subjects: Vec<DistinguishedName>,
}

/// Immutable TLS material: validator, identity, protocol policy and
/// hostname verifier. Safe to share between any number of transports.
pub struct TlsMaterialBundle {
    pub(crate) inner: Arc<BundleInner>,
    protocols: ProtocolPolicy,
    pub(crate) client_config_builder: ConfigBuilder<ClientConfig, WantsVerifier>,
    pub(crate) server_config_builder: ConfigBuilder<ServerConfig, WantsVerifier>,
    pub(crate) session_storage: Arc<dyn StoresServerSessions>,
}

impl std::fmt::Debug for TlsMaterialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterialBundle")
            .field("validator", &self.inner.validator)
            .field("identity", &self.inner.identity)
            .field("protocols", &self.protocols)
            .field("hostname_verifier", &self.inner.hostname_verifier)
            .finish_non_exhaustive()
    }
}

impl TlsMaterialBundle {
    pub(crate) fn new(
        validator: Arc<CompositeValidator>,
        identity: Option<Arc<IdentityProvider>>,
        protocols: ProtocolPolicy,
        hostname_verifier: HostnameVerifier,
        crypto_provider: Arc<CryptoProvider>,
    ) -> Result<Self, ConfigurationError> {
        let narrowed = Arc::new(CryptoProvider {
            cipher_suites: protocols.cipher_suites.clone(),
            ..(*crypto_provider).clone()
        });
        let client_config_builder = ClientConfig::builder_with_provider(Arc::clone(&narrowed))
            .with_protocol_versions(&protocols.versions)
            .map_err(|e| ConfigurationError::InvalidProtocolPolicy(e.to_string()))?;
        let server_config_builder = ServerConfig::builder_with_provider(narrowed)
            .with_protocol_versions(&protocols.versions)
            .map_err(|e| ConfigurationError::InvalidProtocolPolicy(e.to_string()))?;
        let root_hint_subjects = validator.root_hint_subjects();
        Ok(Self {
            inner: Arc::new(BundleInner {
                validator,
                identity,
                hostname_verifier,
                crypto_provider,
                root_hint_subjects,
            }),
            protocols,
            client_config_builder,
            server_config_builder,
            session_storage: ServerSessionMemoryCache::new(256),
        })
    }

    /// The composite validator, for transports that register a raw
    /// validation callback.
    pub fn validator(&self) -> &Arc<CompositeValidator> {
        &self.inner.validator
    }

    /// The local identity, if one was configured.
    pub fn identity(&self) -> Option<&Arc<IdentityProvider>> {
        self.inner.identity.as_ref()
    }

    /// Allowed protocol versions and cipher suites.
    pub fn protocols(&self) -> &ProtocolPolicy {
        &self.protocols
    }

    /// Hostname verification predicate.
    pub fn hostname_verifier(&self) -> HostnameVerifier {
        self.inner.hostname_verifier
    }

    /// The crypto provider used for signatures and key loading.
    pub fn crypto_provider(&self) -> &Arc<CryptoProvider> {
        &self.inner.crypto_provider
    }

    /// Subjects of all trusted store certificates, offered to peers as
    /// acceptable issuers.
    pub fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &self.inner.root_hint_subjects
    }

    /// Produce diagnostic output about this bundle in HTML format.
    #[cfg(feature = "diag")]
    pub fn diag(&self) -> String {
        let mut out = String::from("<ul>");
        if self.inner.validator.bypasses_validation() {
            out.push_str("<li><b>WARNING: certificate validation is disabled</b></li>\n");
        }
        out.push_str(&self.inner.validator.diag().unwrap_or_default());
        match &self.inner.identity {
            None => out.push_str("<li>No local identity</li>\n"),
            Some(id) => out.push_str(&format!(
                "<li>Identity <b>{}</b>{}</li>\n",
                html_escape::encode_text(id.subject()),
                id.valid_until()
                    .map(|t| format!(", valid until {}", t))
                    .unwrap_or_default()
            )),
        }
        out.push_str(&format!(
            "<li>Protocols: {}</li>\n<li>Cipher suites: {}</li>\n<li>Hostname verification: {}</li>\n</ul>\n",
            self.protocols.protocol_names().join(", "),
            self.protocols.cipher_suite_names().join(", "),
            match self.inner.hostname_verifier {
                HostnameVerifier::Strict => "strict",
                HostnameVerifier::Disabled => "disabled",
            }
        ));
        out
    }
}
