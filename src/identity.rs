//! Local identity: the private key and certificate chain we present.

use rustls::InconsistentKeys;
use rustls::crypto::CryptoProvider;
use rustls::sign::CertifiedKey;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::sync::Arc;
use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::builder::ConfigurationError;

/// A private key and the certificate chain (leaf first) that goes with it,
/// as handed over by whatever loaded them.
///
/// The raw key is only ever read by [`IdentityProvider::load`].
pub struct IdentityMaterial {
    key: PrivateKeyDer<'static>,
    chain: Vec<CertificateDer<'static>>,
}

impl IdentityMaterial {
    /// Pair a private key with its certificate chain.
    pub fn new(key: PrivateKeyDer<'static>, chain: Vec<CertificateDer<'static>>) -> Self {
        Self { key, chain }
    }
}

impl Clone for IdentityMaterial {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone_key(),
            chain: self.chain.clone(),
        }
    }
}

// PrivateKeyDer's Debug elides the key, but say nothing about it at all.
impl std::fmt::Debug for IdentityMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityMaterial")
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// Holds the local identity for mutual authentication.
///
/// The private key is held as an opaque [`rustls::sign::SigningKey`] and
/// cannot be read back out.
pub struct IdentityProvider {
    certified_key: Arc<CertifiedKey>,
    subject: String,
    valid_until: Option<OffsetDateTime>,
}

impl std::fmt::Debug for IdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityProvider")
            .field("subject", &self.subject)
            .field("valid_until", &self.valid_until)
            .finish_non_exhaustive()
    }
}

impl IdentityProvider {
    /// Load `material` with `crypto_provider`, checking that the leaf
    /// certificate's public key belongs to the private key. Keys that
    /// cannot report their public key are accepted with a warning.
    pub fn load(
        material: IdentityMaterial,
        crypto_provider: &CryptoProvider,
    ) -> Result<Self, ConfigurationError> {
        let IdentityMaterial { key, chain } = material;
        let Some(leaf) = chain.first() else {
            return Err(ConfigurationError::InvalidStoreData(
                "identity certificate chain is empty".into(),
            ));
        };
        let (_, parsed) = X509Certificate::from_der(leaf.as_ref())
            .map_err(|e| ConfigurationError::InvalidStoreData(e.to_string()))?;
        let subject = parsed.subject().to_string();
        let valid_until = Some(parsed.validity().not_after.to_datetime());
        let signing_key = crypto_provider
            .key_provider
            .load_private_key(key)
            .map_err(|e| ConfigurationError::InvalidStoreData(e.to_string()))?;
        let certified_key = CertifiedKey::new(chain, signing_key);
        match certified_key.keys_match() {
            Ok(()) => (),
            // The signing key cannot report its public key.
            Err(rustls::Error::InconsistentKeys(InconsistentKeys::Unknown)) => {
                log::warn!(
                    "Could not check that identity {} matches its private key",
                    subject
                );
            }
            Err(e) => {
                log::error!("Identity {} does not match its private key: {}", subject, e);
                return Err(ConfigurationError::IdentityKeyMismatch);
            }
        }
        Ok(Self {
            certified_key: Arc::new(certified_key),
            subject,
            valid_until,
        })
    }

    /// The signing key and chain, in the form rustls presents them.
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.certified_key)
    }

    /// The certificate chain we present, leaf first.
    pub fn certificate_chain(&self) -> &[CertificateDer<'static>] {
        &self.certified_key.cert
    }

    /// Subject of our leaf certificate.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// When our leaf certificate expires.
    pub fn valid_until(&self) -> Option<OffsetDateTime> {
        self.valid_until
    }
}
