//! Error types for DKIM key management and signing.

use thiserror::Error;

use sendcore_common::Domain;

/// Errors raised by the keystore or signer.
#[derive(Debug, Error)]
pub enum DkimError {
    /// The sender domain has not completed ownership verification; no key may
    /// be generated or used for it. This is a hard gate.
    #[error("domain not verified: {0}")]
    DomainNotVerified(Domain),

    /// RSA key-pair generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Signing the canonicalized message failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// The backing key repository returned an error.
    #[error("key store error: {0}")]
    Store(String),

    /// No active or inactive key exists and no generation was requested.
    #[error("no dkim key for domain: {0}")]
    NoKey(Domain),
}
