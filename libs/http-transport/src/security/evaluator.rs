use super::der;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a trust evaluator can ask about the server during a handshake.
pub trait ServerTrust {
    /// Standard chain and hostname validation for `host`.
    fn validate_domain(&self, host: &str) -> bool;

    /// DER bytes of the server's leaf certificate.
    fn leaf_certificate(&self) -> &[u8];
}

/// Expected identity of a pinned host.
///
/// Digests are hex strings; case and `:` separators are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    /// SHA-1 of the leaf certificate DER
    Sha1(String),
    /// SHA-256 of the leaf certificate DER
    Sha256(String),
    /// SHA-256 of the leaf certificate's subject public key bits
    PublicKey(String),
    /// Accept anything and log every fingerprint of the presented certificate
    ///
    /// Meant for discovering pins during development.
    Debug,
    /// Accept anything without any check
    Disabled,
}

impl Fingerprint {
    /// Decide whether the server identified by `trust` is acceptable for `host`.
    ///
    /// Digest policies fail closed: domain validation runs first, and a leaf
    /// certificate whose digest cannot be computed never matches.
    pub fn evaluate(&self, trust: &dyn ServerTrust, host: &str) -> bool {
        match self {
            Self::Disabled => true,
            Self::Debug => {
                let leaf = trust.leaf_certificate();
                let public_key =
                    public_key_sha256(leaf).unwrap_or_else(|| "<unreadable>".to_owned());
                tracing::warn!(
                    host,
                    public_key = %public_key,
                    sha1 = %certificate_sha1(leaf),
                    sha256 = %certificate_sha256(leaf),
                    "server trust debug: accepting certificate without evaluation"
                );
                true
            }
            Self::Sha1(expected) => {
                trust.validate_domain(host)
                    && digest_matches(&certificate_sha1(trust.leaf_certificate()), expected)
            }
            Self::Sha256(expected) => {
                trust.validate_domain(host)
                    && digest_matches(&certificate_sha256(trust.leaf_certificate()), expected)
            }
            Self::PublicKey(expected) => {
                trust.validate_domain(host)
                    && public_key_sha256(trust.leaf_certificate())
                        .is_some_and(|actual| digest_matches(&actual, expected))
            }
        }
    }
}

/// Lowercase hex SHA-1 of a DER certificate.
#[must_use]
pub fn certificate_sha1(der: &[u8]) -> String {
    hex::encode(Sha1::digest(der))
}

/// Lowercase hex SHA-256 of a DER certificate.
#[must_use]
pub fn certificate_sha256(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// Lowercase hex SHA-256 of the certificate's subject public key, if it can be located.
#[must_use]
pub fn public_key_sha256(der: &[u8]) -> Option<String> {
    der::subject_public_key(der).map(|key| hex::encode(Sha256::digest(key)))
}

fn digest_matches(actual: &str, expected: &str) -> bool {
    let mut expected = expected
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && *c != ':');
    let mut actual = actual.chars();
    loop {
        match (actual.next(), expected.next()) {
            (Some(a), Some(e)) if a.eq_ignore_ascii_case(&e) => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// A host pattern and the fingerprint it must present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub host: String,
    pub fingerprint: Fingerprint,
}

impl Certificate {
    #[must_use]
    pub fn new(host: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            host: host.into(),
            fingerprint,
        }
    }

    /// Disables evaluation for every host with a `.` in its name.
    #[must_use]
    pub fn wildcard() -> Self {
        Self::new(".", Fingerprint::Disabled)
    }
}

/// Per-host trust evaluators selected by host pattern.
///
/// A pattern applies to a host when either contains the other. When several
/// patterns apply, the longest wins; equal lengths resolve to the
/// lexicographically smallest pattern.
#[derive(Debug, Clone)]
pub struct TrustPolicyManager {
    evaluators: BTreeMap<String, Fingerprint>,
    all_hosts_must_be_evaluated: bool,
}

impl TrustPolicyManager {
    /// Later certificates for the same pattern replace earlier ones.
    /// Hosts without a matching pattern are rejected.
    #[must_use]
    pub fn new(certificates: impl IntoIterator<Item = Certificate>) -> Self {
        Self {
            evaluators: certificates
                .into_iter()
                .map(|certificate| (certificate.host, certificate.fingerprint))
                .collect(),
            all_hosts_must_be_evaluated: true,
        }
    }

    /// Let hosts without a matching pattern through standard validation
    /// instead of rejecting them.
    #[must_use]
    pub fn allow_unmatched_hosts(mut self) -> Self {
        self.all_hosts_must_be_evaluated = false;
        self
    }

    #[must_use]
    pub fn all_hosts_must_be_evaluated(&self) -> bool {
        self.all_hosts_must_be_evaluated
    }

    #[must_use]
    pub fn evaluator_for_host(&self, host: &str) -> Option<&Fingerprint> {
        self.evaluators
            .iter()
            .filter(|(pattern, _)| host.contains(pattern.as_str()) || pattern.contains(host))
            .fold(None, |best: Option<(&String, &Fingerprint)>, candidate| match best {
                Some((pattern, _)) if pattern.len() >= candidate.0.len() => best,
                _ => Some(candidate),
            })
            .map(|(_, fingerprint)| fingerprint)
    }
}

/// Trust configuration of a session.
///
/// The default performs standard certificate validation with no pins, so
/// self-signed or otherwise untrusted certificates are rejected out of the
/// box. Opt out with [`Security::no_evaluation`], which skips every check.
#[derive(Debug, Clone, Default)]
pub struct Security {
    manager: Option<Arc<TrustPolicyManager>>,
}

impl Security {
    /// Standard chain and hostname validation only.
    #[must_use]
    pub fn standard() -> Self {
        Self::default()
    }

    /// Accept any certificate from hosts with a `.` in their name.
    #[must_use]
    pub fn no_evaluation() -> Self {
        Self::with_manager(TrustPolicyManager::new([Certificate::wildcard()]))
    }

    /// Pin the given hosts; other hosts are rejected.
    #[must_use]
    pub fn pinned(certificates: impl IntoIterator<Item = Certificate>) -> Self {
        Self::with_manager(TrustPolicyManager::new(certificates))
    }

    #[must_use]
    pub fn with_manager(manager: TrustPolicyManager) -> Self {
        Self {
            manager: Some(Arc::new(manager)),
        }
    }

    #[must_use]
    pub fn trust_policy_manager(&self) -> Option<&TrustPolicyManager> {
        self.manager.as_deref()
    }

    pub(crate) fn shared_manager(&self) -> Option<Arc<TrustPolicyManager>> {
        self.manager.clone()
    }
}
