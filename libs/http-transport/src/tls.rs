//! TLS configuration for sessions.
//!
//! Root certificates come from `webpki-roots` or the OS store. Native roots
//! are loaded once per process and cached, since the OS lookup can be slow.
//! Every client configuration routes certificate verification through the
//! session's trust policy.

use crate::config::TlsRootConfig;
use crate::error::HttpError;
use crate::security::{PinningVerifier, Security};
use rustls::RootCertStore;
use rustls::client::WebPkiServerVerifier;
use rustls_pki_types::CertificateDer;
use std::sync::{Arc, OnceLock};

/// Cached native root certificates.
/// Always stores Ok; empty vec means no certs found (warned, not errored).
static NATIVE_ROOTS_CACHE: OnceLock<Vec<CertificateDer<'static>>> = OnceLock::new();

/// Counter for test verification that the loader only runs once.
#[cfg(test)]
static LOAD_COUNT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn load_native_certs_inner() -> Vec<CertificateDer<'static>> {
    #[cfg(test)]
    LOAD_COUNT.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    let result = rustls_native_certs::load_native_certs();
    for err in &result.errors {
        tracing::warn!(error = %err, "error loading native root certificate");
    }

    if result.certs.is_empty() {
        tracing::warn!("no native root CA certificates found");
    } else {
        tracing::debug!(count = result.certs.len(), "loaded native root certificates");
    }
    result.certs
}

/// Native root certificates, loaded on first use.
pub fn native_root_certs() -> &'static [CertificateDer<'static>] {
    NATIVE_ROOTS_CACHE
        .get_or_init(load_native_certs_inner)
        .as_slice()
}

/// The globally installed crypto provider, or a fresh aws-lc-rs one.
///
/// Never installs a provider globally.
pub fn get_crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Trust anchors for the given root source.
///
/// # Errors
///
/// Returns `HttpError::Tls` for `TlsRootConfig::Native` when the OS store is
/// empty or none of its certificates parse, so misconfiguration shows up when
/// the session is built instead of during the first handshake.
pub fn root_store(roots: TlsRootConfig) -> Result<RootCertStore, HttpError> {
    match roots {
        TlsRootConfig::WebPki => Ok(RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        }),
        TlsRootConfig::Native => {
            let certs = native_root_certs();
            if certs.is_empty() {
                return Err(HttpError::Tls(
                    "no native root CA certificates found in OS certificate store".into(),
                ));
            }

            let mut store = RootCertStore::empty();
            let (added, ignored) = store.add_parsable_certificates(certs.iter().cloned());
            if ignored > 0 {
                tracing::warn!(added, ignored, "some native root certificates could not be parsed");
            }
            if added == 0 {
                return Err(HttpError::Tls(
                    format!(
                        "no valid native root CA certificates parsed (found {}, all {ignored} failed to parse)",
                        certs.len()
                    )
                    .into(),
                ));
            }
            Ok(store)
        }
    }
}

/// Build a rustls `ClientConfig` whose certificate checks follow `security`.
///
/// # Errors
///
/// Returns `HttpError::Tls` when the root store cannot be built or rustls
/// rejects the protocol or verifier setup.
pub fn client_config(
    roots: TlsRootConfig,
    security: &Security,
) -> Result<rustls::ClientConfig, HttpError> {
    let provider = get_crypto_provider();
    let store = root_store(roots)?;

    let webpki = WebPkiServerVerifier::builder_with_provider(Arc::new(store), provider.clone())
        .build()
        .map_err(|e| HttpError::Tls(Box::new(e)))?;
    let verifier = PinningVerifier::new(webpki, security.shared_manager());

    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::Tls(Box::new(e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    Ok(config)
}

/// True when `err` or anything in its source chain is a rustls failure.
///
/// Connectors wrap rustls errors in `std::io::Error`, whose `source()` skips
/// the wrapped error, so I/O errors are unwrapped explicitly.
pub fn is_tls_failure(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<rustls::Error>() {
            return true;
        }
        if let Some(inner) = e
            .downcast_ref::<std::io::Error>()
            .and_then(std::io::Error::get_ref)
            && inner.is::<rustls::Error>()
        {
            return true;
        }
        current = e.source();
    }
    false
}
