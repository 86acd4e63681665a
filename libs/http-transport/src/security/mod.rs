//! Certificate pinning.
//!
//! A [`Security`] value holds an optional [`TrustPolicyManager`] mapping host
//! patterns to [`Fingerprint`] policies. Sessions install it into their TLS
//! configuration, so the decision runs during every handshake.

mod der;
mod evaluator;
mod verifier;

pub use evaluator::{
    Certificate, Fingerprint, Security, ServerTrust, TrustPolicyManager, certificate_sha1,
    certificate_sha256, public_key_sha256,
};
pub(crate) use verifier::PinningVerifier;
