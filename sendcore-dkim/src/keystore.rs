//! Per-domain DKIM keystore.
//!
//! Keys are generated lazily, only for domains that have completed ownership
//! verification, and are cached write-through in front of a [`KeyRepository`]
//! that owns durable storage: the repository is the source of truth, the
//! keystore only serializes concurrent first-generation.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use dashmap::DashMap;
use rand::rngs::OsRng;
use rsa::{
    RsaPrivateKey, RsaPublicKey,
    pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey},
    traits::PublicKeyParts,
};
use sendcore_common::Domain;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::DkimError;

/// RSA modulus size for newly generated keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeySize {
    Bits1024,
    Bits2048,
    Bits4096,
}

impl KeySize {
    #[must_use]
    pub const fn bits(self) -> usize {
        match self {
            Self::Bits1024 => 1024,
            Self::Bits2048 => 2048,
            Self::Bits4096 => 4096,
        }
    }
}

impl Default for KeySize {
    fn default() -> Self {
        Self::Bits2048
    }
}

/// A single DKIM key-pair record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DkimKey {
    pub domain: Domain,
    pub selector: String,
    /// PKCS#1 PEM-encoded RSA private key.
    pub private_key_pem: String,
    /// Base64-encoded SubjectPublicKeyInfo-free RSA public key (as published
    /// in the DNS TXT record's `p=` tag, no PEM headers).
    pub public_key_b64: String,
    pub algorithm: &'static str,
    pub canonicalization: &'static str,
    pub key_size: KeySize,
    pub active: bool,
    pub created_at: i64,
}

impl DkimKey {
    fn generate(domain: Domain, selector: String, key_size: KeySize) -> Result<Self, DkimError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, key_size.bits())
            .map_err(|e| DkimError::KeyGeneration(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);

        let private_key_pem = private_key
            .to_pkcs1_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|e| DkimError::KeyGeneration(e.to_string()))?
            .to_string();
        let public_key_der = public_key
            .to_pkcs1_der()
            .map_err(|e| DkimError::KeyGeneration(e.to_string()))?;

        Ok(Self {
            domain,
            selector,
            private_key_pem,
            public_key_b64: BASE64.encode(public_key_der.as_bytes()),
            algorithm: "rsa-sha256",
            canonicalization: "relaxed/relaxed",
            key_size,
            active: true,
            created_at: now_unix(),
        })
    }

    /// Parse the stored PEM back into an [`RsaPrivateKey`] for signing.
    pub(crate) fn private_key(&self) -> Result<RsaPrivateKey, DkimError> {
        use rsa::pkcs1::DecodeRsaPrivateKey;
        RsaPrivateKey::from_pkcs1_pem(&self.private_key_pem)
            .map_err(|e| DkimError::Signing(e.to_string()))
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Durable storage for DKIM keys, unique on (domain, selector).
///
/// The keystore treats this as the source of truth; the in-process cache
/// (`Keystore`) only exists to avoid a round-trip on the hot signing path and
/// to serialize first-generation per domain.
#[async_trait]
pub trait KeyRepository: Send + Sync {
    async fn find_active(&self, domain: &Domain) -> Result<Option<DkimKey>, DkimError>;
    async fn find_inactive(&self, domain: &Domain) -> Result<Option<DkimKey>, DkimError>;
    async fn insert(&self, key: DkimKey) -> Result<(), DkimError>;
    async fn deactivate_all(&self, domain: &Domain) -> Result<(), DkimError>;
    async fn reactivate(&self, domain: &Domain, selector: &str) -> Result<(), DkimError>;
}

/// Whether a domain has completed ownership verification, using the same
/// registry-lookup shape as `sendcore-scheduler`'s per-domain delivery
/// overrides, generalized from delivery overrides to a verification flag
/// owned by the tenant/domain management surface.
#[async_trait]
pub trait DomainVerification: Send + Sync {
    async fn is_verified(&self, domain: &Domain) -> Result<bool, DkimError>;
}

/// In-memory [`KeyRepository`], keyed by (domain, selector). Suitable as the
/// default store and as the test double for `sendcore-scheduler`'s delivery
/// tests; a durable backend plugs into the same trait.
#[derive(Debug, Default)]
pub struct InMemoryKeyRepository {
    keys: DashMap<(Domain, String), DkimKey>,
}

#[async_trait]
impl KeyRepository for InMemoryKeyRepository {
    async fn find_active(&self, domain: &Domain) -> Result<Option<DkimKey>, DkimError> {
        Ok(self
            .keys
            .iter()
            .find(|entry| entry.key().0 == *domain && entry.value().active)
            .map(|entry| entry.value().clone()))
    }

    async fn find_inactive(&self, domain: &Domain) -> Result<Option<DkimKey>, DkimError> {
        Ok(self
            .keys
            .iter()
            .find(|entry| entry.key().0 == *domain && !entry.value().active)
            .map(|entry| entry.value().clone()))
    }

    async fn insert(&self, key: DkimKey) -> Result<(), DkimError> {
        self.keys
            .insert((key.domain.clone(), key.selector.clone()), key);
        Ok(())
    }

    async fn deactivate_all(&self, domain: &Domain) -> Result<(), DkimError> {
        for mut entry in self.keys.iter_mut() {
            if entry.key().0 == *domain {
                entry.value_mut().active = false;
            }
        }
        Ok(())
    }

    async fn reactivate(&self, domain: &Domain, selector: &str) -> Result<(), DkimError> {
        if let Some(mut entry) = self.keys.get_mut(&(domain.clone(), selector.to_string())) {
            entry.active = true;
        }
        Ok(())
    }
}

/// Set of domains that carry a statically provisioned key rather than one
/// generated on first send: the "platform-internal" sender domains used
/// for system-originated mail such as DSNs.
#[derive(Debug, Default, Clone)]
pub struct InternalDomains(Arc<HashSet<Domain>>);

impl InternalDomains {
    #[must_use]
    pub fn new(domains: impl IntoIterator<Item = Domain>) -> Self {
        Self(Arc::new(domains.into_iter().collect()))
    }

    #[must_use]
    pub fn contains(&self, domain: &Domain) -> bool {
        self.0.contains(domain)
    }
}

/// Production [`DomainVerification`] backed by an in-memory set of sender
/// domains that have completed ownership verification. Domain ownership
/// verification itself (DNS TXT challenge, UI) is an out-of-scope
/// collaborator; this registry is the seam it writes through — `mark_verified`
/// is called once a domain passes that external workflow, and `unverify` once
/// it's removed.
#[derive(Debug, Default)]
pub struct VerifiedDomainRegistry {
    verified: DashMap<Domain, ()>,
}

impl VerifiedDomainRegistry {
    #[must_use]
    pub fn new(domains: impl IntoIterator<Item = Domain>) -> Self {
        let verified = DashMap::new();
        for domain in domains {
            verified.insert(domain, ());
        }
        Self { verified }
    }

    pub fn mark_verified(&self, domain: Domain) {
        self.verified.insert(domain, ());
    }

    pub fn unverify(&self, domain: &Domain) {
        self.verified.remove(domain);
    }
}

#[async_trait]
impl DomainVerification for VerifiedDomainRegistry {
    async fn is_verified(&self, domain: &Domain) -> Result<bool, DkimError> {
        Ok(self.verified.contains_key(domain))
    }
}

/// Default key size and internal-domain configuration for the keystore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreConfig {
    #[serde(default)]
    pub default_key_size: KeySize,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            default_key_size: KeySize::default(),
        }
    }
}

/// Coordinates lazy key generation, rotation, and the per-domain
/// write-exclusive critical section so concurrent first-sends never race
/// to create duplicate keys for the same domain.
pub struct Keystore<R: KeyRepository, V: DomainVerification> {
    repository: Arc<R>,
    verification: Arc<V>,
    internal: InternalDomains,
    internal_key: Option<Arc<DkimKey>>,
    config: KeystoreConfig,
    generation_locks: DashMap<Domain, Arc<Mutex<()>>>,
}

impl<R: KeyRepository, V: DomainVerification> std::fmt::Debug for Keystore<R, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keystore")
            .field("internal", &self.internal)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<R: KeyRepository, V: DomainVerification> Keystore<R, V> {
    #[must_use]
    pub fn new(
        repository: Arc<R>,
        verification: Arc<V>,
        internal: InternalDomains,
        internal_key: Option<DkimKey>,
        config: KeystoreConfig,
    ) -> Self {
        Self {
            repository,
            verification,
            internal,
            internal_key: internal_key.map(Arc::new),
            config,
            generation_locks: DashMap::new(),
        }
    }

    fn lock_for(&self, domain: &Domain) -> Arc<Mutex<()>> {
        self.generation_locks
            .entry(domain.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Fetches the domain's key, generating and persisting one on first use.
    pub async fn get_or_generate(&self, domain: &Domain) -> Result<Arc<DkimKey>, DkimError> {
        if self.internal.contains(domain) {
            return self
                .internal_key
                .clone()
                .ok_or_else(|| DkimError::NoKey(domain.clone()));
        }

        if !self.verification.is_verified(domain).await? {
            return Err(DkimError::DomainNotVerified(domain.clone()));
        }

        if let Some(key) = self.repository.find_active(domain).await? {
            return Ok(Arc::new(key));
        }

        // Serialize the read-check-generate sequence per domain so two
        // concurrent first-sends can't both generate a key.
        let lock = self.lock_for(domain);
        let _guard = lock.lock().await;

        // Re-check under the lock: another task may have generated one
        // while we were waiting.
        if let Some(key) = self.repository.find_active(domain).await? {
            return Ok(Arc::new(key));
        }

        if let Some(key) = self.repository.find_inactive(domain).await? {
            self.repository.reactivate(domain, &key.selector).await?;
            let mut reactivated = key;
            reactivated.active = true;
            return Ok(Arc::new(reactivated));
        }

        let key = DkimKey::generate(
            domain.clone(),
            "default".to_string(),
            self.config.default_key_size,
        )?;
        self.repository.insert(key.clone()).await?;
        tracing::info!(domain = %domain, selector = %key.selector, "generated new DKIM key");
        Ok(Arc::new(key))
    }

    /// Generates and persists a new key under a fresh selector. The caller
    /// is responsible for publishing the new DNS TXT record before traffic
    /// switches to the new selector.
    pub async fn rotate(
        &self,
        domain: &Domain,
        new_selector: Option<String>,
    ) -> Result<Arc<DkimKey>, DkimError> {
        self.repository.deactivate_all(domain).await?;

        let selector =
            new_selector.unwrap_or_else(|| format!("rotate-{}", chrono::Utc::now().timestamp()));
        let key = DkimKey::generate(domain.clone(), selector, self.config.default_key_size)?;
        self.repository.insert(key.clone()).await?;
        tracing::info!(domain = %domain, selector = %key.selector, "rotated DKIM key");
        Ok(Arc::new(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysVerified;

    #[async_trait]
    impl DomainVerification for AlwaysVerified {
        async fn is_verified(&self, _domain: &Domain) -> Result<bool, DkimError> {
            Ok(true)
        }
    }

    struct NeverVerified;

    #[async_trait]
    impl DomainVerification for NeverVerified {
        async fn is_verified(&self, _domain: &Domain) -> Result<bool, DkimError> {
            Ok(false)
        }
    }

    fn keystore<V: DomainVerification>(
        verification: V,
    ) -> Keystore<InMemoryKeyRepository, V> {
        Keystore::new(
            Arc::new(InMemoryKeyRepository::default()),
            Arc::new(verification),
            InternalDomains::default(),
            None,
            KeystoreConfig::default(),
        )
    }

    #[tokio::test]
    async fn generates_key_for_verified_domain() {
        let ks = keystore(AlwaysVerified);
        let domain = Domain::new("example.test");
        let key = ks.get_or_generate(&domain).await.unwrap();
        assert_eq!(key.selector, "default");
        assert_eq!(key.algorithm, "rsa-sha256");
        assert!(key.active);
    }

    #[tokio::test]
    async fn refuses_unverified_domain() {
        let ks = keystore(NeverVerified);
        let domain = Domain::new("unverified.test");
        let err = ks.get_or_generate(&domain).await.unwrap_err();
        assert!(matches!(err, DkimError::DomainNotVerified(_)));
    }

    #[tokio::test]
    async fn reuses_active_key_on_second_call() {
        let ks = keystore(AlwaysVerified);
        let domain = Domain::new("example.test");
        let first = ks.get_or_generate(&domain).await.unwrap();
        let second = ks.get_or_generate(&domain).await.unwrap();
        assert_eq!(first.private_key_pem, second.private_key_pem);
    }

    #[tokio::test]
    async fn rotate_deactivates_old_key_and_creates_new_selector() {
        let ks = keystore(AlwaysVerified);
        let domain = Domain::new("example.test");
        let original = ks.get_or_generate(&domain).await.unwrap();
        let rotated = ks
            .rotate(&domain, Some("2024a".to_string()))
            .await
            .unwrap();
        assert_ne!(original.private_key_pem, rotated.private_key_pem);
        assert_eq!(rotated.selector, "2024a");

        let inactive = ks.repository.find_inactive(&domain).await.unwrap().unwrap();
        assert_eq!(inactive.selector, "default");
        assert!(!inactive.active);
    }
}
