//! Per-domain DKIM keystore and RFC 6376 signer.
//!
//! RSA key-pairs are generated lazily for verified sender domains only,
//! cached write-through over a pluggable [`KeyRepository`], and used to
//! build a relaxed/relaxed `DKIM-Signature` header over a canonicalized
//! message.

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod error;
pub mod keystore;
pub mod signer;
pub mod store_repository;

use async_trait::async_trait;
use sendcore_common::Domain;

pub use error::DkimError;
pub use keystore::{
    DkimKey, DomainVerification, InMemoryKeyRepository, InternalDomains, KeyRepository, KeySize,
    Keystore, KeystoreConfig, VerifiedDomainRegistry,
};
pub use signer::{body_hash, canonicalize_body_relaxed, canonicalize_header_relaxed, sign};
pub use store_repository::RelationalKeyRepository;

/// Object-safe signing surface for callers (the scheduler's delivery worker)
/// that don't want to thread `Keystore`'s repository/verification type
/// parameters through their own generics.
#[async_trait]
pub trait DkimService: Send + Sync + std::fmt::Debug {
    /// Signs `headers`/`body` for `domain`, returning the full `DKIM-Signature`
    /// tag string ready to be prepended as a header line.
    ///
    /// # Errors
    /// Returns [`DkimError::DomainNotVerified`] if the domain has no verified
    /// sender record, or [`DkimError::Signing`] if a required header is
    /// missing.
    async fn sign(
        &self,
        domain: &Domain,
        headers: &[(String, String)],
        body: &str,
    ) -> Result<String, DkimError>;
}

#[async_trait]
impl<R: KeyRepository, V: DomainVerification> DkimService for Keystore<R, V> {
    async fn sign(
        &self,
        domain: &Domain,
        headers: &[(String, String)],
        body: &str,
    ) -> Result<String, DkimError> {
        let key = self.get_or_generate(domain).await?;
        signer::sign(&key, headers, body)
    }
}
