//! Tenant context: active-state, plan tier, and rolling send-rate counters.

use std::sync::Arc;

use ahash::AHashSet;
use dashmap::DashMap;
use parking_lot::Mutex;
use sendcore_store::relational::{RelationalStore, TenantRow};
use serde::{Deserialize, Serialize};

use crate::error::RateTier;

/// Billing/quota tier. Also drives the scheduler's plan-share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plan {
    Basic,
    Professional,
    Enterprise,
}

impl Plan {
    /// Additive priority bonus applied during admission.
    #[must_use]
    pub const fn priority_bonus(self) -> i32 {
        match self {
            Self::Basic => 0,
            Self::Professional => 10,
            Self::Enterprise => 20,
        }
    }

    /// Slice of the scheduler's global concurrency cap.
    #[must_use]
    pub const fn plan_share(self) -> usize {
        match self {
            Self::Basic => 1,
            Self::Professional => 3,
            Self::Enterprise => 5,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Professional => "professional",
            Self::Enterprise => "enterprise",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "professional" => Self::Professional,
            "enterprise" => Self::Enterprise,
            _ => Self::Basic,
        }
    }
}

/// Per-tenant send caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendCaps {
    pub per_minute: u32,
    pub hourly: u32,
    pub daily: u32,
}

/// A fixed-window counter that resets when its window elapses, the same
/// idiomatic approximation of a rolling counter that `sendcore-scheduler`'s
/// per-domain rate limiter uses, applied here per tenant instead of per
/// domain.
#[derive(Debug)]
struct WindowCounter {
    count: u32,
    window_start: i64,
    window_secs: i64,
}

impl WindowCounter {
    const fn new(window_secs: i64) -> Self {
        Self {
            count: 0,
            window_start: 0,
            window_secs,
        }
    }

    fn reset_if_elapsed(&mut self, now: i64) {
        if now - self.window_start >= self.window_secs {
            self.count = 0;
            self.window_start = now;
        }
    }

    fn remaining(&mut self, now: i64, cap: u32) -> u32 {
        self.reset_if_elapsed(now);
        cap.saturating_sub(self.count)
    }

    fn increment(&mut self, now: i64) {
        self.reset_if_elapsed(now);
        self.count += 1;
    }
}

#[derive(Debug)]
struct RollingCounters {
    minute: WindowCounter,
    hour: WindowCounter,
    day: WindowCounter,
}

impl Default for RollingCounters {
    fn default() -> Self {
        Self {
            minute: WindowCounter::new(60),
            hour: WindowCounter::new(3600),
            day: WindowCounter::new(86_400),
        }
    }
}

/// Tenant record. `historical_reputation` is an external rolling score in
/// `[0, 1]` maintained outside the delivery core (e.g. by account-health
/// scoring); admission only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub id: String,
    pub active: bool,
    pub plan: Plan,
    pub caps: SendCaps,
    pub verified_sender_domains: AHashSet<String>,
    pub historical_reputation: f64,
}

/// Snapshot returned by [`TenantRegistry::get`].
#[derive(Debug, Clone)]
pub struct TenantSnapshot {
    pub config: TenantConfig,
    pub remaining_per_minute: u32,
    pub remaining_hourly: u32,
    pub remaining_daily: u32,
}

fn config_to_row(config: &TenantConfig) -> TenantRow {
    TenantRow {
        id: config.id.clone(),
        active: config.active,
        plan: config.plan.as_str().to_string(),
        per_minute_cap: config.caps.per_minute as i32,
        hourly_cap: config.caps.hourly as i32,
        daily_cap: config.caps.daily as i32,
        verified_sender_domains: config.verified_sender_domains.iter().cloned().collect(),
        historical_reputation: config.historical_reputation,
    }
}

fn row_to_config(row: TenantRow) -> TenantConfig {
    TenantConfig {
        id: row.id,
        active: row.active,
        plan: Plan::from_str(&row.plan),
        caps: SendCaps {
            per_minute: row.per_minute_cap as u32,
            hourly: row.hourly_cap as u32,
            daily: row.daily_cap as u32,
        },
        verified_sender_domains: row.verified_sender_domains.into_iter().collect(),
        historical_reputation: row.historical_reputation,
    }
}

/// In-process tenant registry, write-through cache in front of
/// [`RelationalStore`]'s `tenants` table when `store` is set (a durability-
/// less deployment, or a test, simply never sets it).
#[derive(Debug, Default)]
pub struct TenantRegistry {
    tenants: DashMap<String, TenantConfig>,
    counters: DashMap<String, Mutex<RollingCounters>>,
    store: Option<Arc<RelationalStore>>,
}

impl TenantRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache-fronted registry backed by `store` for durability.
    #[must_use]
    pub fn with_store(store: Arc<RelationalStore>) -> Self {
        Self {
            tenants: DashMap::new(),
            counters: DashMap::new(),
            store: Some(store),
        }
    }

    /// Loads every tenant row from the durable store into the in-process
    /// cache. Call once at startup, before traffic is admitted.
    ///
    /// # Errors
    /// Returns an error if the backing store query fails.
    pub async fn hydrate(&self) -> Result<(), crate::error::AdmissionError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let rows = store
            .all_tenants()
            .await
            .map_err(|e| crate::error::AdmissionError::StoreUnavailable(e.to_string()))?;
        for row in rows {
            self.upsert(row_to_config(row));
        }
        Ok(())
    }

    /// In-process only; does not write through to the durable store. Used
    /// for tenant config loaded from the static startup configuration file,
    /// and by [`Self::hydrate`] to repopulate the cache. Prefer
    /// [`Self::upsert_durable`] for anything that must survive a restart.
    pub fn upsert(&self, config: TenantConfig) {
        self.counters
            .entry(config.id.clone())
            .or_insert_with(|| Mutex::new(RollingCounters::default()));
        self.tenants.insert(config.id.clone(), config);
    }

    /// Upserts both the in-process cache and, if configured, the durable
    /// store.
    ///
    /// # Errors
    /// Returns an error if the backing store write fails; the in-memory
    /// cache has already been updated by the time this can happen.
    pub async fn upsert_durable(
        &self,
        config: TenantConfig,
    ) -> Result<(), crate::error::AdmissionError> {
        let row = config_to_row(&config);
        self.upsert(config);
        if let Some(store) = &self.store {
            store
                .upsert_tenant(&row)
                .await
                .map_err(|e| crate::error::AdmissionError::StoreUnavailable(e.to_string()))?;
        }
        Ok(())
    }

    /// Snapshot of every registered tenant's config, for the control socket's
    /// tenant list command.
    #[must_use]
    pub fn all(&self) -> Vec<TenantConfig> {
        self.tenants.iter().map(|r| r.clone()).collect()
    }

    /// Fetches a tenant's current config and rolling-counter snapshot.
    #[must_use]
    pub fn get(&self, tenant_id: &str, now: i64) -> Option<TenantSnapshot> {
        let config = self.tenants.get(tenant_id)?.clone();
        let counters = self.counters.entry(tenant_id.to_string()).or_default();
        let mut counters = counters.lock();
        Some(TenantSnapshot {
            remaining_per_minute: counters.minute.remaining(now, config.caps.per_minute),
            remaining_hourly: counters.hour.remaining(now, config.caps.hourly),
            remaining_daily: counters.day.remaining(now, config.caps.daily),
            config,
        })
    }

    /// Validates a send against a tenant's caps. Returns the first violated
    /// constraint, checked inactive → daily → hourly → per-minute → domain.
    pub fn validate_send(
        &self,
        tenant_id: &str,
        from_domain: &str,
        now: i64,
    ) -> Result<(), crate::error::AdmissionError> {
        use crate::error::AdmissionError;

        let Some(config) = self.tenants.get(tenant_id).map(|r| r.clone()) else {
            return Err(AdmissionError::UnknownTenant(tenant_id.to_string()));
        };

        if !config.active {
            return Err(AdmissionError::TenantInactive);
        }

        let counters = self.counters.entry(tenant_id.to_string()).or_default();
        let mut counters = counters.lock();

        if counters.day.remaining(now, config.caps.daily) == 0 {
            return Err(AdmissionError::RateExceeded {
                tier: RateTier::Daily,
            });
        }
        if counters.hour.remaining(now, config.caps.hourly) == 0 {
            return Err(AdmissionError::RateExceeded {
                tier: RateTier::Hourly,
            });
        }
        if counters.minute.remaining(now, config.caps.per_minute) == 0 {
            return Err(AdmissionError::RateExceeded {
                tier: RateTier::PerMinute,
            });
        }

        if !config.verified_sender_domains.contains(from_domain) {
            return Err(AdmissionError::DomainNotAllowed(from_domain.to_string()));
        }

        Ok(())
    }

    /// Increments all three rolling counters. Called on successful
    /// admission, never on delivery.
    pub fn record_admission(&self, tenant_id: &str, now: i64) {
        if let Some(counters) = self.counters.get(tenant_id) {
            let mut counters = counters.lock();
            counters.minute.increment(now);
            counters.hour.increment(now);
            counters.day.increment(now);
        }
    }
}
