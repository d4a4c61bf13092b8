//! Provide access to the process-global default [`CryptoProvider`] if there
//! is one, otherwise the crate-wide default one.

use rustls::crypto::CryptoProvider;
use std::sync::Arc;

/// The process-global default [`CryptoProvider`] if one was installed,
/// otherwise rustls' `aws-lc-rs` provider.
///
/// Used by [`crate::TlsMaterialBuilder`] unless
/// [`crate::TlsMaterialBuilder::with_crypto_provider`] overrides it.
pub fn default_crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}
