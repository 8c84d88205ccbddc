//! Per-tenant and global suppression list.

use std::sync::Arc;

use ahash::AHashMap;
use dashmap::DashMap;
use sendcore_store::relational::{RelationalStore, SuppressionRow, GLOBAL_TENANT_SENTINEL};
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// Classification of a suppression record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuppressionType {
    Bounce,
    Complaint,
    Manual,
    Global,
}

/// Classification of a bounce-type suppression (only set when
/// `SuppressionType::Bounce`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BounceType {
    Hard,
    Soft,
    Block,
}

/// Classifies a raw SMTP failure-response string into a [`BounceType`] using
/// deterministic substring rules. Matching is case-insensitive and evaluated
/// in order: hard, then block, then soft.
#[must_use]
pub fn classify_bounce(response: &str) -> BounceType {
    let lower = response.to_ascii_lowercase();

    let hard_markers = ["5.1.1", "user unknown", "no such user", "mailbox not found"];
    if hard_markers.iter().any(|m| lower.contains(m)) {
        return BounceType::Hard;
    }

    let block_markers = ["5.7.1", "blocked", "blacklisted", "policy"];
    if block_markers.iter().any(|m| lower.contains(m)) {
        return BounceType::Block;
    }

    let soft_markers = ["try again", "temporary"];
    if soft_markers.iter().any(|m| lower.contains(m)) || contains_4xx_code(&lower) {
        return BounceType::Soft;
    }

    // Unrecognized responses default to soft.
    BounceType::Soft
}

fn contains_4xx_code(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.windows(5).any(|w| {
        w[0] == b'4'
            && w[1] == b'.'
            && w[2].is_ascii_digit()
            && w[3] == b'.'
            && w[4].is_ascii_digit()
    })
}

/// One suppression record, unique on `(tenant_id, email)` (`None` tenant_id
/// is the global list).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub tenant_id: Option<String>,
    pub email: String,
    pub kind: SuppressionType,
    pub bounce_type: Option<BounceType>,
    pub reason: Option<String>,
    pub metadata: AHashMap<String, String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SuppressionType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Bounce => "bounce",
            Self::Complaint => "complaint",
            Self::Manual => "manual",
            Self::Global => "global",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "complaint" => Self::Complaint,
            "manual" => Self::Manual,
            "global" => Self::Global,
            _ => Self::Bounce,
        }
    }
}

impl BounceType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Hard => "hard",
            Self::Soft => "soft",
            Self::Block => "block",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "hard" => Self::Hard,
            "block" => Self::Block,
            _ => Self::Soft,
        }
    }
}

fn entry_to_row(key: &(Option<Arc<str>>, String), entry: &SuppressionEntry) -> SuppressionRow {
    SuppressionRow {
        tenant_id: key
            .0
            .as_deref()
            .map_or_else(|| GLOBAL_TENANT_SENTINEL.to_string(), ToString::to_string),
        email: entry.email.clone(),
        kind: entry.kind.as_str().to_string(),
        bounce_type: entry.bounce_type.map(|b| b.as_str().to_string()),
        reason: entry.reason.clone(),
        metadata: entry.metadata.clone(),
        created_at: entry.created_at,
        updated_at: entry.updated_at,
    }
}

fn row_to_entry(row: SuppressionRow) -> ((Option<Arc<str>>, String), SuppressionEntry) {
    let tenant_id = if row.tenant_id == GLOBAL_TENANT_SENTINEL {
        None
    } else {
        Some(row.tenant_id.clone())
    };
    let key = (tenant_id.as_deref().map(Arc::from), row.email.clone());
    let entry = SuppressionEntry {
        tenant_id,
        email: row.email,
        kind: SuppressionType::from_str(&row.kind),
        bounce_type: row.bounce_type.as_deref().map(BounceType::from_str),
        reason: row.reason,
        metadata: row.metadata,
        created_at: row.created_at,
        updated_at: row.updated_at,
    };
    (key, entry)
}

/// Per-tenant / global suppression list.
///
/// `is_suppressed` fails open on a store error, an explicit design choice to
/// avoid dropping legitimate mail over a transient storage hiccup, accepting
/// the risk of a rare unsuppressed send.
///
/// The `DashMap` is the hot-path cache; when `store` is set, mutating
/// methods write through to the durable backend, and [`Self::hydrate`]
/// repopulates the cache from it at startup.
#[derive(Debug, Default)]
pub struct SuppressionList {
    entries: DashMap<(Option<Arc<str>>, String), SuppressionEntry>,
    store: Option<Arc<RelationalStore>>,
}

impl SuppressionList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache-fronted list backed by `store` for durability.
    #[must_use]
    pub fn with_store(store: Arc<RelationalStore>) -> Self {
        Self {
            entries: DashMap::new(),
            store: Some(store),
        }
    }

    /// Loads every row from the durable store into the in-process cache.
    /// Call once at startup, before traffic is admitted.
    ///
    /// # Errors
    /// Returns an error if the backing store query fails.
    pub async fn hydrate(&self) -> Result<(), PolicyError> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        for row in store
            .all_suppressions()
            .await
            .map_err(|e| PolicyError::Store(e.to_string()))?
        {
            let (key, entry) = row_to_entry(row);
            self.entries.insert(key, entry);
        }

        Ok(())
    }

    fn key(tenant: Option<&str>, email: &str) -> (Option<Arc<str>>, String) {
        (tenant.map(Arc::from), email.to_ascii_lowercase())
    }

    /// Checks whether a recipient is globally or tenant-specifically suppressed.
    #[must_use]
    pub fn is_suppressed(&self, tenant: Option<&str>, email: &str) -> bool {
        let lowered = email.to_ascii_lowercase();
        self.entries.contains_key(&Self::key(None, &lowered))
            || tenant.is_some_and(|t| self.entries.contains_key(&Self::key(Some(t), &lowered)))
    }

    /// Upserts by `(tenant, email)`, merging fields on conflict.
    ///
    /// # Errors
    /// Returns an error if the backing store write fails; the in-memory
    /// cache has already been updated by the time this can happen.
    pub async fn record(
        &self,
        email: &str,
        kind: SuppressionType,
        reason: Option<String>,
        tenant: Option<&str>,
        bounce_type: Option<BounceType>,
        metadata: AHashMap<String, String>,
    ) -> Result<(), PolicyError> {
        let lowered = email.to_ascii_lowercase();
        let now = chrono::Utc::now().timestamp();
        let key = Self::key(tenant, &lowered);

        let entry = self
            .entries
            .entry(key.clone())
            .and_modify(|entry| {
                entry.kind = kind;
                if bounce_type.is_some() {
                    entry.bounce_type = bounce_type;
                }
                if reason.is_some() {
                    entry.reason.clone_from(&reason);
                }
                entry.metadata.extend(metadata.clone());
                entry.updated_at = now;
            })
            .or_insert_with(|| SuppressionEntry {
                tenant_id: tenant.map(ToString::to_string),
                email: lowered,
                kind,
                bounce_type,
                reason,
                metadata,
                created_at: now,
                updated_at: now,
            })
            .clone();

        if let Some(store) = &self.store {
            store
                .upsert_suppression(&entry_to_row(&key, &entry))
                .await
                .map_err(|e| PolicyError::Store(e.to_string()))?;
        }

        Ok(())
    }

    /// Ingests a raw SMTP bounce response: hard/block bounces are recorded
    /// as a suppression, soft bounces are logged only.
    /// Returns the classification so the caller can drive delivery-outcome
    /// bookkeeping from the same call.
    pub async fn ingest_bounce(
        &self,
        email: &str,
        tenant: Option<&str>,
        raw_response: &str,
    ) -> BounceType {
        let bounce_type = classify_bounce(raw_response);
        match bounce_type {
            BounceType::Hard | BounceType::Block => {
                let _ = self
                    .record(
                        email,
                        SuppressionType::Bounce,
                        Some(raw_response.to_string()),
                        tenant,
                        Some(bounce_type),
                        AHashMap::default(),
                    )
                    .await;
            }
            BounceType::Soft => {
                tracing::debug!(%email, "soft bounce logged, not suppressed: {raw_response}");
            }
        }
        bounce_type
    }

    /// Removes bounce-type suppression entries whose `bounce_type` is
    /// `Soft` and that are older than `max_age_secs`. Soft bounces are
    /// never actually inserted as suppressions by [`Self::ingest_bounce`];
    /// this exists for entries a caller recorded manually with a
    /// soft classification through [`Self::record`], mirroring a 30-day
    /// soft-bounce cleanup sweep.
    ///
    /// # Errors
    /// Returns an error if the backing store delete fails.
    pub async fn cleanup_soft_bounces(
        &self,
        now: i64,
        max_age_secs: i64,
    ) -> Result<usize, PolicyError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            !(entry.bounce_type == Some(BounceType::Soft) && now - entry.updated_at > max_age_secs)
        });
        let removed = before - self.entries.len();

        if let Some(store) = &self.store {
            store
                .delete_stale_soft_bounces(now, max_age_secs)
                .await
                .map_err(|e| PolicyError::Store(e.to_string()))?;
        }

        Ok(removed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
