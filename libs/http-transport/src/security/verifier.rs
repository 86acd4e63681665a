use super::evaluator::{ServerTrust, TrustPolicyManager};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;

/// rustls verifier that applies the session's trust policy on top of
/// standard WebPKI validation.
///
/// Without a policy manager every certificate goes through the inner
/// verifier unchanged. With one, the evaluator selected for the server's
/// host decides, and hosts without an evaluator are rejected unless the
/// manager allows unmatched hosts. Handshake signatures are always checked
/// by the inner verifier.
#[derive(Debug)]
pub struct PinningVerifier {
    inner: Arc<dyn ServerCertVerifier>,
    manager: Option<Arc<TrustPolicyManager>>,
}

impl PinningVerifier {
    pub(crate) fn new(
        inner: Arc<dyn ServerCertVerifier>,
        manager: Option<Arc<TrustPolicyManager>>,
    ) -> Self {
        Self { inner, manager }
    }
}

/// The certificate material of one handshake, as seen by an evaluator.
struct HandshakeTrust<'a> {
    verifier: &'a dyn ServerCertVerifier,
    end_entity: &'a CertificateDer<'a>,
    intermediates: &'a [CertificateDer<'a>],
    ocsp_response: &'a [u8],
    now: UnixTime,
}

impl ServerTrust for HandshakeTrust<'_> {
    fn validate_domain(&self, host: &str) -> bool {
        let Ok(name) = ServerName::try_from(host) else {
            tracing::warn!(host, "host is not a valid TLS server name");
            return false;
        };
        match self.verifier.verify_server_cert(
            self.end_entity,
            self.intermediates,
            &name,
            self.ocsp_response,
            self.now,
        ) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(host, error = %e, "server certificate failed domain validation");
                false
            }
        }
    }

    fn leaf_certificate(&self) -> &[u8] {
        self.end_entity.as_ref()
    }
}

fn host_of(server_name: &ServerName<'_>) -> Option<String> {
    match server_name {
        ServerName::DnsName(name) => Some(name.as_ref().to_owned()),
        ServerName::IpAddress(ip) => Some(std::net::IpAddr::from(*ip).to_string()),
        _ => None,
    }
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let Some(manager) = &self.manager else {
            return self.inner.verify_server_cert(
                end_entity,
                intermediates,
                server_name,
                ocsp_response,
                now,
            );
        };

        let Some(host) = host_of(server_name) else {
            return Err(rustls::Error::General(
                "unsupported server name for trust evaluation".to_owned(),
            ));
        };

        match manager.evaluator_for_host(&host) {
            Some(fingerprint) => {
                let trust = HandshakeTrust {
                    verifier: self.inner.as_ref(),
                    end_entity,
                    intermediates,
                    ocsp_response,
                    now,
                };
                if fingerprint.evaluate(&trust, &host) {
                    tracing::debug!(host, "server certificate accepted by trust policy");
                    Ok(ServerCertVerified::assertion())
                } else {
                    tracing::warn!(host, "server certificate rejected by trust policy");
                    Err(rustls::Error::General(format!(
                        "certificate for '{host}' rejected by trust policy"
                    )))
                }
            }
            None if manager.all_hosts_must_be_evaluated() => {
                tracing::warn!(host, "no trust evaluator configured for host");
                Err(rustls::Error::General(format!(
                    "no trust evaluator configured for '{host}'"
                )))
            }
            None => self.inner.verify_server_cert(
                end_entity,
                intermediates,
                server_name,
                ocsp_response,
                now,
            ),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::security::{Certificate, Fingerprint, Security};
    use crate::tls::get_crypto_provider;
    use rustls::RootCertStore;
    use rustls::client::WebPkiServerVerifier;
    use std::time::Duration;

    const LEAF: &[u8] = include_bytes!("testdata/pinned_leaf.der");
    const LEAF_SHA256: &str = "9b88284eee632b59d87b3c8f2926b0fd99bbd4f57c4e7fb3d8381866fc5ce9de";
    const LEAF_KEY_SHA256: &str =
        "603516ef02051af53b3be5062da86fa8f03023c185ce0d218f1e48a7457e5831";

    /// The fixture is self-signed and trusted as its own root.
    fn webpki() -> Arc<dyn ServerCertVerifier> {
        let mut roots = RootCertStore::empty();
        roots.add(CertificateDer::from(LEAF.to_vec())).unwrap();
        WebPkiServerVerifier::builder_with_provider(Arc::new(roots), get_crypto_provider())
            .build()
            .unwrap()
    }

    fn verify(security: &Security, host: &str) -> Result<ServerCertVerified, rustls::Error> {
        let verifier = PinningVerifier::new(webpki(), security.shared_manager());
        let name = ServerName::try_from(host.to_owned()).unwrap();
        // well inside the fixture's validity window
        let now = UnixTime::since_unix_epoch(Duration::from_secs(1_900_000_000));
        verifier.verify_server_cert(&CertificateDer::from(LEAF), &[], &name, &[], now)
    }

    #[test]
    fn test_standard_validation_without_manager() {
        assert!(verify(&Security::standard(), "pinned.example.com").is_ok());
        assert!(verify(&Security::standard(), "other.example.com").is_err());
    }

    #[test]
    fn test_matching_pins_are_accepted() {
        let by_cert = Security::pinned([Certificate::new(
            "pinned.example.com",
            Fingerprint::Sha256(LEAF_SHA256.to_ascii_uppercase()),
        )]);
        let by_key = Security::pinned([Certificate::new(
            "example.com",
            Fingerprint::PublicKey(LEAF_KEY_SHA256.to_owned()),
        )]);

        assert!(verify(&by_cert, "pinned.example.com").is_ok());
        assert!(verify(&by_key, "pinned.example.com").is_ok());
    }

    #[test]
    fn test_mismatched_pin_is_rejected() {
        let security = Security::pinned([Certificate::new(
            "pinned.example.com",
            Fingerprint::Sha256("00".repeat(32)),
        )]);

        let err = verify(&security, "pinned.example.com").unwrap_err();
        assert!(matches!(err, rustls::Error::General(message) if message.contains("rejected")));
    }

    #[test]
    fn test_pin_does_not_bypass_domain_validation() {
        let security = Security::pinned([Certificate::new(
            "example.com",
            Fingerprint::Sha256(LEAF_SHA256.to_owned()),
        )]);

        assert!(verify(&security, "evil.example.com").is_err());
    }

    #[test]
    fn test_unmatched_host_is_rejected_by_default() {
        let security = Security::pinned([Certificate::new(
            "api.other.org",
            Fingerprint::Sha256(LEAF_SHA256.to_owned()),
        )]);

        let err = verify(&security, "pinned.example.com").unwrap_err();
        assert!(matches!(err, rustls::Error::General(message) if message.contains("no trust evaluator")));
    }

    #[test]
    fn test_unmatched_host_can_fall_back_to_standard_validation() {
        let security = Security::with_manager(
            crate::security::TrustPolicyManager::new([Certificate::new(
                "api.other.org",
                Fingerprint::Debug,
            )])
            .allow_unmatched_hosts(),
        );

        assert!(verify(&security, "pinned.example.com").is_ok());
    }

    #[test]
    fn test_no_evaluation_accepts_name_mismatch() {
        assert!(verify(&Security::no_evaluation(), "anything.example.net").is_ok());
    }

    #[test]
    fn test_host_of_ip_address() {
        let name = ServerName::try_from("127.0.0.1").unwrap();
        assert_eq!(host_of(&name).as_deref(), Some("127.0.0.1"));
    }
}
