//! rustls integration for [`TlsMaterialBundle`].
//!
//! Transports that speak rustls get a [`ClientConfig`] or [`ServerConfig`]
//! whose certificate verification goes through the bundle's composite
//! validator:
//!
//! ```
//! # use tls_material::{TlsMaterialBuilder, TrustStore};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bundle = TlsMaterialBuilder::new()
//!     .with_trust_store(TrustStore::new("empty", [])?)
//!     .build()?;
//! let client_config = bundle.client_config();
//! let server_config = bundle.server_config::<tls_material::ClientAuthDisabled>();
//! # let _ = (client_config, server_config);
//! # Ok(())
//! # }
//! ```

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::{ClientConfig, ResolvesClientCert};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::{ClientHello, ResolvesServerCert, ServerConfig};
use rustls::sign::CertifiedKey;
use rustls::{
    CertificateError, ConfigBuilder, DigitallySignedStruct, DistinguishedName, SignatureScheme,
    WantsVerifier,
};
use std::sync::Arc;

use crate::api::{CertificateChain, PeerRole};
use crate::bundle::{BundleInner, TlsMaterialBundle};

// Peers learn only that their certificate was refused. The reasons are in
// the audit trail.
fn refused() -> rustls::Error {
    rustls::Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure)
}

fn validate(
    inner: &BundleInner,
    end_entity: &CertificateDer<'_>,
    intermediates: &[CertificateDer<'_>],
    role: PeerRole,
    now: UnixTime,
) -> Result<CertificateChain, rustls::Error> {
    let chain = CertificateChain::from_handshake(end_entity, intermediates);
    if inner.validator.validate_at(&chain, role, now).is_accept() {
        Ok(chain)
    } else {
        Err(refused())
    }
}

#[derive(Debug)]
struct ClientConfigBackend {
    inner: Arc<BundleInner>,
}

impl ResolvesClientCert for ClientConfigBackend {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        self.inner.identity.as_ref().map(|i| i.certified_key())
    }

    fn has_certs(&self) -> bool {
        self.inner.identity.is_some()
    }
}

impl ServerCertVerifier for ClientConfigBackend {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let chain = validate(&self.inner, end_entity, intermediates, PeerRole::Server, now)?;
        if self
            .inner
            .hostname_verifier
            .verify_server_name(server_name, &chain)
        {
            Ok(ServerCertVerified::assertion())
        } else {
            log::debug!(
                target: crate::audit::AUDIT_TARGET,
                "Server certificate [{}] does not match hostname {}",
                chain.subject(),
                server_name.to_str()
            );
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.inner.crypto_provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.inner.crypto_provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner
            .crypto_provider
            .signature_verification_algorithms
            .supported_schemes()
    }

    fn root_hint_subjects(&self) -> Option<&[DistinguishedName]> {
        Some(&self.inner.root_hint_subjects)
    }
}

#[derive(Debug)]
struct ServerConfigBackend {
    inner: Arc<BundleInner>,
}

impl ResolvesServerCert for ServerConfigBackend {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.inner.identity.as_ref().map(|i| i.certified_key())
    }
}

impl ClientCertVerifier for ServerConfigBackend {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &self.inner.root_hint_subjects
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        validate(&self.inner, end_entity, intermediates, PeerRole::Client, now)?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.inner.crypto_provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.inner.crypto_provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner
            .crypto_provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Trait for either [`ClientAuthEnabled`] or [`ClientAuthDisabled`].
pub trait ClientAuthMode {
    #[doc(hidden)]
    #[allow(private_interfaces)]
    fn configure_client_auth(
        backend: &Arc<ServerConfigBackend>,
        scb: ConfigBuilder<ServerConfig, WantsVerifier>,
    ) -> ConfigBuilder<ServerConfig, rustls::server::WantsServerCert>;
}

/// Type argument for [`TlsMaterialBundle::server_config`] to require a
/// client certificate.
pub enum ClientAuthEnabled {}

impl ClientAuthMode for ClientAuthEnabled {
    #[allow(private_interfaces)]
    fn configure_client_auth(
        backend: &Arc<ServerConfigBackend>,
        scb: ConfigBuilder<ServerConfig, WantsVerifier>,
    ) -> ConfigBuilder<ServerConfig, rustls::server::WantsServerCert> {
        let verifier = Arc::clone(backend);
        scb.with_client_cert_verifier(verifier)
    }
}

/// Type argument for [`TlsMaterialBundle::server_config`] to request no
/// client certificate.
pub enum ClientAuthDisabled {}

impl ClientAuthMode for ClientAuthDisabled {
    #[allow(private_interfaces)]
    fn configure_client_auth(
        _: &Arc<ServerConfigBackend>,
        scb: ConfigBuilder<ServerConfig, WantsVerifier>,
    ) -> ConfigBuilder<ServerConfig, rustls::server::WantsServerCert> {
        scb.with_no_client_auth()
    }
}

impl TlsMaterialBundle {
    /// Returns a TLS [`ClientConfig`] that validates servers with this
    /// bundle's validator and hostname verifier, and presents the local
    /// identity if the server asks for one.
    pub fn client_config(&self) -> ClientConfig {
        let backend = Arc::new(ClientConfigBackend {
            inner: Arc::clone(&self.inner),
        });
        let backend2 = Arc::clone(&backend);
        self.client_config_builder
            .clone()
            .dangerous()
            .with_custom_certificate_verifier(backend)
            .with_client_cert_resolver(backend2)
    }

    /// Returns a TLS [`ServerConfig`] that presents the local identity and,
    /// with [`ClientAuthEnabled`], validates client certificates with this
    /// bundle's validator.
    ///
    /// Handshakes fail if no identity was configured.
    pub fn server_config<CA: ClientAuthMode>(&self) -> ServerConfig {
        let backend = Arc::new(ServerConfigBackend {
            inner: Arc::clone(&self.inner),
        });
        let mut sc = CA::configure_client_auth(&backend, self.server_config_builder.clone())
            .with_cert_resolver(backend);
        sc.session_storage = Arc::clone(&self.session_storage);
        sc
    }
}
