//! Durable relational store: the source of truth the in-process
//! write-through caches (`TenantRegistry`, `ReputationEngine`,
//! `SuppressionList`, `InMemoryKeyRepository`'s durable counterpart) sit in
//! front of.
//!
//! Row types here are plain data, deliberately independent of the domain
//! types owned by `sendcore-tenant`/`sendcore-policy`/`sendcore-dkim` (none
//! of which this crate may depend on); each consuming crate converts to and
//! from its own domain type at the call site.

use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter, Set,
    sea_query::OnConflict,
};
use sea_orm_migration::MigratorTrait;

use super::entities::{dkim_key, domain_reputation, message_id, mx_reputation, suppression_entry, tenant};
use super::error::{RelationalError, Result};
use super::migrations::Migrator;

/// A row in the durable `tenants` table.
#[derive(Debug, Clone)]
pub struct TenantRow {
    pub id: String,
    pub active: bool,
    pub plan: String,
    pub per_minute_cap: i32,
    pub hourly_cap: i32,
    pub daily_cap: i32,
    pub verified_sender_domains: Vec<String>,
    pub historical_reputation: f64,
}

/// A row in the durable `dkim_keys` table.
#[derive(Debug, Clone)]
pub struct DkimKeyRow {
    pub domain: String,
    pub selector: String,
    pub private_key_pem: String,
    pub public_key_b64: String,
    pub algorithm: String,
    pub canonicalization: String,
    pub key_size: String,
    pub active: bool,
    pub created_at: i64,
}

/// A row in the durable `domain_reputation` table.
#[derive(Debug, Clone)]
pub struct DomainReputationRow {
    pub domain: String,
    pub score: f64,
    pub successful: u64,
    pub failed: u64,
    pub last_success: Option<i64>,
    pub last_failure: Option<i64>,
}

/// A row in the durable `mx_reputation` table.
#[derive(Debug, Clone)]
pub struct MxReputationRow {
    pub mx_server: String,
    pub domain: String,
    pub score: f64,
    pub successful: u64,
    pub failed: u64,
    pub avg_response_ms: f64,
    pub last_success: Option<i64>,
    pub last_failure: Option<i64>,
    pub recent_failure_reasons: Vec<String>,
}

/// A row in the durable `suppression_entries` table. `tenant_id` is
/// `suppression_entry::GLOBAL_TENANT_SENTINEL` for a global entry.
#[derive(Debug, Clone)]
pub struct SuppressionRow {
    pub tenant_id: String,
    pub email: String,
    pub kind: String,
    pub bounce_type: Option<String>,
    pub reason: Option<String>,
    pub metadata: ahash::AHashMap<String, String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Sentinel used in place of a nullable `tenant_id` for global suppression
/// entries; re-exported here so callers don't need the `entities` module.
pub use super::entities::suppression_entry::GLOBAL_TENANT_SENTINEL;

fn score_to_milli(score: f64) -> i64 {
    (score * 1000.0).round() as i64
}

fn milli_to_score(milli: i64) -> f64 {
    milli as f64 / 1000.0
}

/// Handle to the durable relational backend. Cheap to clone (wraps a pooled
/// `sea_orm::DatabaseConnection`); every sub-crate's write-through cache
/// holds an `Arc<RelationalStore>` (or `Option` of one, for the
/// memory-only/test configuration).
#[derive(Debug, Clone)]
pub struct RelationalStore {
    conn: DatabaseConnection,
}

impl RelationalStore {
    /// Connects to `url` (any backend `sea-orm` dispatches on the URL
    /// scheme for, in practice sqlite:// or postgres://) and applies every
    /// pending migration.
    ///
    /// # Errors
    /// Returns an error if the connection or a migration fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let conn = Database::connect(url).await?;
        Migrator::up(&conn, None)
            .await
            .map_err(|e| RelationalError::Migration(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Wraps an already-open connection (tests, or a connection shared with
    /// another subsystem). Does not run migrations; the caller is
    /// responsible for having called [`Self::connect`] or
    /// `Migrator::up` itself.
    #[must_use]
    pub const fn from_connection(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    // --- tenants ---------------------------------------------------------

    /// Upserts a tenant record by id.
    ///
    /// # Errors
    /// Returns an error if the write fails or the row can't be serialized.
    pub async fn upsert_tenant(&self, row: &TenantRow) -> Result<()> {
        let now = now_unix();
        let domains = serde_json::to_string(&row.verified_sender_domains)?;
        let active = tenant::ActiveModel {
            id: Set(row.id.clone()),
            active: Set(row.active),
            plan: Set(row.plan.clone()),
            per_minute_cap: Set(row.per_minute_cap),
            hourly_cap: Set(row.hourly_cap),
            daily_cap: Set(row.daily_cap),
            verified_sender_domains: Set(domains),
            historical_reputation: Set(row.historical_reputation),
            created_at: Set(now),
            updated_at: Set(now),
        };
        tenant::Entity::insert(active)
            .on_conflict(
                OnConflict::column(tenant::Column::Id)
                    .update_columns([
                        tenant::Column::Active,
                        tenant::Column::Plan,
                        tenant::Column::PerMinuteCap,
                        tenant::Column::HourlyCap,
                        tenant::Column::DailyCap,
                        tenant::Column::VerifiedSenderDomains,
                        tenant::Column::HistoricalReputation,
                        tenant::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    /// Loads every tenant row, for hydrating the in-process registry at
    /// startup.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row's JSON column is
    /// malformed.
    pub async fn all_tenants(&self) -> Result<Vec<TenantRow>> {
        let models = tenant::Entity::find().all(&self.conn).await?;
        models
            .into_iter()
            .map(|m| {
                let verified_sender_domains = serde_json::from_str(&m.verified_sender_domains)?;
                Ok(TenantRow {
                    id: m.id,
                    active: m.active,
                    plan: m.plan,
                    per_minute_cap: m.per_minute_cap,
                    hourly_cap: m.hourly_cap,
                    daily_cap: m.daily_cap,
                    verified_sender_domains,
                    historical_reputation: m.historical_reputation,
                })
            })
            .collect()
    }

    // --- dkim keys ---------------------------------------------------------

    /// Finds the active key for `domain`, if any.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find_active_dkim_key(&self, domain: &str) -> Result<Option<DkimKeyRow>> {
        let model = dkim_key::Entity::find()
            .filter(dkim_key::Column::Domain.eq(domain))
            .filter(dkim_key::Column::Active.eq(true))
            .one(&self.conn)
            .await?;
        Ok(model.map(Into::into))
    }

    /// Finds an inactive key for `domain`, if any.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn find_inactive_dkim_key(&self, domain: &str) -> Result<Option<DkimKeyRow>> {
        let model = dkim_key::Entity::find()
            .filter(dkim_key::Column::Domain.eq(domain))
            .filter(dkim_key::Column::Active.eq(false))
            .one(&self.conn)
            .await?;
        Ok(model.map(Into::into))
    }

    /// Inserts a newly generated key.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn insert_dkim_key(&self, row: &DkimKeyRow) -> Result<()> {
        let active = dkim_key::ActiveModel {
            id: sea_orm::NotSet,
            domain: Set(row.domain.clone()),
            selector: Set(row.selector.clone()),
            private_key_pem: Set(row.private_key_pem.clone()),
            public_key_b64: Set(row.public_key_b64.clone()),
            algorithm: Set(row.algorithm.clone()),
            canonicalization: Set(row.canonicalization.clone()),
            key_size: Set(row.key_size.clone()),
            active: Set(row.active),
            created_at: Set(row.created_at),
        };
        active.insert(&self.conn).await?;
        Ok(())
    }

    /// Deactivates every key for `domain` (a key rotation's first step).
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn deactivate_all_dkim_keys(&self, domain: &str) -> Result<()> {
        dkim_key::Entity::update_many()
            .filter(dkim_key::Column::Domain.eq(domain))
            .col_expr(dkim_key::Column::Active, sea_orm::sea_query::Expr::value(false))
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    /// Reactivates the key at `(domain, selector)`.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn reactivate_dkim_key(&self, domain: &str, selector: &str) -> Result<()> {
        dkim_key::Entity::update_many()
            .filter(dkim_key::Column::Domain.eq(domain))
            .filter(dkim_key::Column::Selector.eq(selector))
            .col_expr(dkim_key::Column::Active, sea_orm::sea_query::Expr::value(true))
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    // --- reputation ---------------------------------------------------------

    /// Upserts a domain's reputation counters.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn upsert_domain_reputation(&self, row: &DomainReputationRow) -> Result<()> {
        let active = domain_reputation::ActiveModel {
            domain: Set(row.domain.clone()),
            score_milli: Set(score_to_milli(row.score)),
            successful: Set(row.successful as i64),
            failed: Set(row.failed as i64),
            last_success: Set(row.last_success),
            last_failure: Set(row.last_failure),
        };
        domain_reputation::Entity::insert(active)
            .on_conflict(
                OnConflict::column(domain_reputation::Column::Domain)
                    .update_columns([
                        domain_reputation::Column::ScoreMilli,
                        domain_reputation::Column::Successful,
                        domain_reputation::Column::Failed,
                        domain_reputation::Column::LastSuccess,
                        domain_reputation::Column::LastFailure,
                    ])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    /// Deletes a domain's reputation row (a manual reset).
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn delete_domain_reputation(&self, domain: &str) -> Result<()> {
        domain_reputation::Entity::delete_by_id(domain.to_string())
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    /// Loads every domain reputation row, for hydrating the in-process
    /// engine at startup.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn all_domain_reputations(&self) -> Result<Vec<DomainReputationRow>> {
        let models = domain_reputation::Entity::find().all(&self.conn).await?;
        Ok(models
            .into_iter()
            .map(|m| DomainReputationRow {
                domain: m.domain,
                score: milli_to_score(m.score_milli),
                successful: m.successful as u64,
                failed: m.failed as u64,
                last_success: m.last_success,
                last_failure: m.last_failure,
            })
            .collect())
    }

    /// Upserts an (mx, domain) reputation row.
    ///
    /// # Errors
    /// Returns an error if the write fails or the row can't be serialized.
    pub async fn upsert_mx_reputation(&self, row: &MxReputationRow) -> Result<()> {
        let reasons = serde_json::to_string(&row.recent_failure_reasons)?;
        let active = mx_reputation::ActiveModel {
            id: sea_orm::NotSet,
            mx_server: Set(row.mx_server.clone()),
            domain: Set(row.domain.clone()),
            score_milli: Set(score_to_milli(row.score)),
            successful: Set(row.successful as i64),
            failed: Set(row.failed as i64),
            avg_response_milli_ms: Set(score_to_milli(row.avg_response_ms)),
            last_success: Set(row.last_success),
            last_failure: Set(row.last_failure),
            recent_failure_reasons: Set(reasons),
        };
        // Conflict target is the unique (mx_server, domain) index, not the
        // surrogate `id` primary key, so this stays atomic under concurrent
        // writers racing on the same pair.
        mx_reputation::Entity::insert(active)
            .on_conflict(
                OnConflict::columns([mx_reputation::Column::MxServer, mx_reputation::Column::Domain])
                    .update_columns([
                        mx_reputation::Column::ScoreMilli,
                        mx_reputation::Column::Successful,
                        mx_reputation::Column::Failed,
                        mx_reputation::Column::AvgResponseMilliMs,
                        mx_reputation::Column::LastSuccess,
                        mx_reputation::Column::LastFailure,
                        mx_reputation::Column::RecentFailureReasons,
                    ])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    /// Deletes every mx reputation row for `domain` (part of a reset).
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn delete_mx_reputations_for_domain(&self, domain: &str) -> Result<()> {
        mx_reputation::Entity::delete_many()
            .filter(mx_reputation::Column::Domain.eq(domain))
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    // --- suppression ---------------------------------------------------------

    /// Upserts a suppression entry by `(tenant_id, email)`.
    ///
    /// # Errors
    /// Returns an error if the write fails or the row can't be serialized.
    pub async fn upsert_suppression(&self, row: &SuppressionRow) -> Result<()> {
        let metadata = serde_json::to_string(&row.metadata)?;
        let active = suppression_entry::ActiveModel {
            id: sea_orm::NotSet,
            tenant_id: Set(row.tenant_id.clone()),
            email: Set(row.email.clone()),
            kind: Set(row.kind.clone()),
            bounce_type: Set(row.bounce_type.clone()),
            reason: Set(row.reason.clone()),
            metadata: Set(metadata),
            created_at: Set(row.created_at),
            updated_at: Set(row.updated_at),
        };
        // Conflict target is the unique (tenant_id, email) index, not the
        // surrogate `id` primary key, so this stays atomic under concurrent
        // writers racing on the same recipient.
        suppression_entry::Entity::insert(active)
            .on_conflict(
                OnConflict::columns([
                    suppression_entry::Column::TenantId,
                    suppression_entry::Column::Email,
                ])
                .update_columns([
                    suppression_entry::Column::Kind,
                    suppression_entry::Column::BounceType,
                    suppression_entry::Column::Reason,
                    suppression_entry::Column::Metadata,
                    suppression_entry::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    /// Deletes suppression entries classified `bounce_type = "soft"` whose
    /// `updated_at` is older than `now - max_age_secs`.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn delete_stale_soft_bounces(&self, now: i64, max_age_secs: i64) -> Result<u64> {
        let result = suppression_entry::Entity::delete_many()
            .filter(suppression_entry::Column::BounceType.eq("soft"))
            .filter(suppression_entry::Column::UpdatedAt.lt(now - max_age_secs))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Loads every suppression row, for hydrating the in-process list at
    /// startup.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row's JSON column is
    /// malformed.
    pub async fn all_suppressions(&self) -> Result<Vec<SuppressionRow>> {
        let models = suppression_entry::Entity::find().all(&self.conn).await?;
        models
            .into_iter()
            .map(|m| {
                let metadata = serde_json::from_str(&m.metadata)?;
                Ok(SuppressionRow {
                    tenant_id: m.tenant_id,
                    email: m.email,
                    kind: m.kind,
                    bounce_type: m.bounce_type,
                    reason: m.reason,
                    metadata,
                    created_at: m.created_at,
                    updated_at: m.updated_at,
                })
            })
            .collect()
    }

    // --- message ids (I4) ---------------------------------------------------

    /// Atomically reserves `message_id`. Returns `true` if this call
    /// performed the reservation, `false` if the id was already reserved by
    /// an earlier call (including from a previous process instance).
    ///
    /// # Errors
    /// Returns an error if the write fails for a reason other than a
    /// uniqueness conflict.
    pub async fn reserve_message_id(&self, message_id: &str, now: i64) -> Result<bool> {
        let active = message_id::ActiveModel {
            message_id: Set(message_id.to_string()),
            reserved_at: Set(now),
        };
        let result = message_id::Entity::insert(active)
            .on_conflict(
                OnConflict::column(message_id::Column::MessageId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await?;
        Ok(result == 1)
    }
}

impl From<dkim_key::Model> for DkimKeyRow {
    fn from(m: dkim_key::Model) -> Self {
        Self {
            domain: m.domain,
            selector: m.selector,
            private_key_pem: m.private_key_pem,
            public_key_b64: m.public_key_b64,
            algorithm: m.algorithm,
            canonicalization: m.canonicalization,
            key_size: m.key_size,
            active: m.active,
            created_at: m.created_at,
        }
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
