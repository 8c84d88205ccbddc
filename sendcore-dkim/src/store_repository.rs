//! [`KeyRepository`] backed by the durable relational store, for deployments
//! where DKIM keys must survive a process restart rather than live only in
//! [`InMemoryKeyRepository`].

use std::sync::Arc;

use async_trait::async_trait;
use sendcore_common::Domain;
use sendcore_store::relational::{DkimKeyRow, RelationalStore};

use crate::error::DkimError;
use crate::keystore::{DkimKey, KeyRepository, KeySize};

impl KeySize {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Bits1024 => "1024",
            Self::Bits2048 => "2048",
            Self::Bits4096 => "4096",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "1024" => Self::Bits1024,
            "4096" => Self::Bits4096,
            _ => Self::Bits2048,
        }
    }
}

fn row_to_key(row: DkimKeyRow) -> DkimKey {
    DkimKey {
        domain: Domain::new(row.domain),
        selector: row.selector,
        private_key_pem: row.private_key_pem,
        public_key_b64: row.public_key_b64,
        // Both fixed at generation time; stored as plain strings for schema
        // portability, but the keystore only ever produces these two values.
        algorithm: "rsa-sha256",
        canonicalization: "relaxed/relaxed",
        key_size: KeySize::from_str(&row.key_size),
        active: row.active,
        created_at: row.created_at,
    }
}

fn key_to_row(key: &DkimKey) -> DkimKeyRow {
    DkimKeyRow {
        domain: key.domain.as_str().to_string(),
        selector: key.selector.clone(),
        private_key_pem: key.private_key_pem.clone(),
        public_key_b64: key.public_key_b64.clone(),
        algorithm: key.algorithm.to_string(),
        canonicalization: key.canonicalization.to_string(),
        key_size: key.key_size.as_str().to_string(),
        active: key.active,
        created_at: key.created_at,
    }
}

/// Durable [`KeyRepository`] wrapping [`RelationalStore`].
#[derive(Debug, Clone)]
pub struct RelationalKeyRepository {
    store: Arc<RelationalStore>,
}

impl RelationalKeyRepository {
    #[must_use]
    pub const fn new(store: Arc<RelationalStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl KeyRepository for RelationalKeyRepository {
    async fn find_active(&self, domain: &Domain) -> Result<Option<DkimKey>, DkimError> {
        self.store
            .find_active_dkim_key(domain.as_str())
            .await
            .map(|opt| opt.map(row_to_key))
            .map_err(|e| DkimError::Store(e.to_string()))
    }

    async fn find_inactive(&self, domain: &Domain) -> Result<Option<DkimKey>, DkimError> {
        self.store
            .find_inactive_dkim_key(domain.as_str())
            .await
            .map(|opt| opt.map(row_to_key))
            .map_err(|e| DkimError::Store(e.to_string()))
    }

    async fn insert(&self, key: DkimKey) -> Result<(), DkimError> {
        self.store
            .insert_dkim_key(&key_to_row(&key))
            .await
            .map_err(|e| DkimError::Store(e.to_string()))
    }

    async fn deactivate_all(&self, domain: &Domain) -> Result<(), DkimError> {
        self.store
            .deactivate_all_dkim_keys(domain.as_str())
            .await
            .map_err(|e| DkimError::Store(e.to_string()))
    }

    async fn reactivate(&self, domain: &Domain, selector: &str) -> Result<(), DkimError> {
        self.store
            .reactivate_dkim_key(domain.as_str(), selector)
            .await
            .map_err(|e| DkimError::Store(e.to_string()))
    }
}
