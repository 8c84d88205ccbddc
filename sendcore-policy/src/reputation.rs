//! Rolling per-domain and per-MX reputation.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use sendcore_store::relational::{DomainReputationRow, MxReputationRow, RelationalStore};
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// Bucketed admission tier derived from a reputation score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReputationTier {
    Excellent,
    Good,
    Warning,
    Poor,
    Blocked,
}

#[must_use]
pub fn tier_for_score(score: f64) -> ReputationTier {
    if score >= 95.0 {
        ReputationTier::Excellent
    } else if score >= 80.0 {
        ReputationTier::Good
    } else if score >= 60.0 {
        ReputationTier::Warning
    } else if score >= 40.0 {
        ReputationTier::Poor
    } else {
        ReputationTier::Blocked
    }
}

/// Rolling reputation for a recipient domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainReputation {
    pub domain: String,
    pub score: f64,
    pub successful: u64,
    pub failed: u64,
    pub last_success: Option<i64>,
    pub last_failure: Option<i64>,
}

impl DomainReputation {
    fn new(domain: String) -> Self {
        Self {
            domain,
            score: 100.0,
            successful: 0,
            failed: 0,
            last_success: None,
            last_failure: None,
        }
    }

    #[must_use]
    pub fn bounce_rate(&self) -> f64 {
        let total = self.successful + self.failed;
        if total == 0 {
            0.0
        } else {
            self.failed as f64 / total as f64
        }
    }

    #[must_use]
    pub fn tier(&self) -> ReputationTier {
        tier_for_score(self.score)
    }

    /// Recomputes `score`: base ratio, then a recent-failure penalty if this
    /// outcome is itself a failure and the previous failure happened within
    /// the last 24h.
    fn recompute(&mut self, now: i64, outcome_is_failure: bool) {
        let total = self.successful + self.failed;
        let mut score = if total == 0 {
            100.0
        } else {
            (self.successful as f64 / total as f64) * 100.0
        };

        if outcome_is_failure {
            if let Some(last_failure) = self.last_failure {
                if now - last_failure < 24 * 3600 {
                    score = (score - 5.0).max(0.0);
                }
            }
        }

        self.score = score.clamp(0.0, 100.0);
    }

    fn record_success(&mut self, now: i64) {
        self.successful += 1;
        self.last_success = Some(now);
        self.recompute(now, false);
    }

    fn record_failure(&mut self, now: i64) {
        self.failed += 1;
        self.recompute(now, true);
        self.last_failure = Some(now);
    }
}

const FAILURE_REASON_RING_SIZE: usize = 10;

/// Rolling reputation for a specific MX server serving a specific domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MxServerReputation {
    pub mx_server: String,
    pub domain: String,
    pub score: f64,
    pub successful: u64,
    pub failed: u64,
    pub avg_response_ms: f64,
    pub last_success: Option<i64>,
    pub last_failure: Option<i64>,
    pub recent_failure_reasons: VecDeque<String>,
}

impl MxServerReputation {
    fn new(mx_server: String, domain: String) -> Self {
        Self {
            mx_server,
            domain,
            score: 100.0,
            successful: 0,
            failed: 0,
            avg_response_ms: 0.0,
            last_success: None,
            last_failure: None,
            recent_failure_reasons: VecDeque::with_capacity(FAILURE_REASON_RING_SIZE),
        }
    }

    fn record_success(&mut self, now: i64, response_ms: f64) {
        self.successful += 1;
        self.last_success = Some(now);
        // Incremental mean over all successful attempts.
        self.avg_response_ms += (response_ms - self.avg_response_ms) / self.successful as f64;
        self.recompute(now, false);
    }

    fn record_failure(&mut self, now: i64, reason: String) {
        self.failed += 1;
        self.recompute(now, true);
        self.last_failure = Some(now);
        if self.recent_failure_reasons.len() == FAILURE_REASON_RING_SIZE {
            self.recent_failure_reasons.pop_front();
        }
        self.recent_failure_reasons.push_back(reason);
    }

    fn recompute(&mut self, now: i64, outcome_is_failure: bool) {
        let total = self.successful + self.failed;
        let mut score = if total == 0 {
            100.0
        } else {
            (self.successful as f64 / total as f64) * 100.0
        };
        if outcome_is_failure {
            if let Some(last_failure) = self.last_failure {
                if now - last_failure < 24 * 3600 {
                    score = (score - 5.0).max(0.0);
                }
            }
        }
        self.score = score.clamp(0.0, 100.0);
    }
}

/// Admission decision from [`ReputationEngine::check_delivery_allowed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryAllowed {
    /// Domain has no history yet.
    AllowNewDomain,
    /// Allowed, optionally carrying a warning flag (e.g. "high bounce").
    Allow { warning: Option<&'static str> },
    /// Blocked; the tier fell below the admission floor.
    Deny { recommendation: &'static str },
}

/// Rolling per-domain and per-(mx, domain) reputation store, gating new
/// admission and ingesting delivery outcomes.
///
/// The `DashMap`s are the hot-path cache; when `store` is set, every
/// mutating method also writes through to the durable backend so reputation
/// survives a process restart, and [`Self::hydrate`] repopulates the cache
/// from it at startup.
#[derive(Debug, Default)]
pub struct ReputationEngine {
    domains: DashMap<String, DomainReputation>,
    mx_servers: DashMap<(String, String), MxServerReputation>,
    store: Option<Arc<RelationalStore>>,
}

impl ReputationEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache-fronted engine backed by `store` for durability.
    #[must_use]
    pub fn with_store(store: Arc<RelationalStore>) -> Self {
        Self {
            domains: DashMap::new(),
            mx_servers: DashMap::new(),
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
            .all_domain_reputations()
            .await
            .map_err(|e| PolicyError::Store(e.to_string()))?
        {
            self.domains.insert(
                row.domain.clone(),
                DomainReputation {
                    domain: row.domain,
                    score: row.score,
                    successful: row.successful,
                    failed: row.failed,
                    last_success: row.last_success,
                    last_failure: row.last_failure,
                },
            );
        }

        Ok(())
    }

    async fn persist_domain(&self, rep: &DomainReputation) -> Result<(), PolicyError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store
            .upsert_domain_reputation(&DomainReputationRow {
                domain: rep.domain.clone(),
                score: rep.score,
                successful: rep.successful,
                failed: rep.failed,
                last_success: rep.last_success,
                last_failure: rep.last_failure,
            })
            .await
            .map_err(|e| PolicyError::Store(e.to_string()))
    }

    async fn persist_mx(&self, rep: &MxServerReputation) -> Result<(), PolicyError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store
            .upsert_mx_reputation(&MxReputationRow {
                mx_server: rep.mx_server.clone(),
                domain: rep.domain.clone(),
                score: rep.score,
                successful: rep.successful,
                failed: rep.failed,
                avg_response_ms: rep.avg_response_ms,
                last_success: rep.last_success,
                last_failure: rep.last_failure,
                recent_failure_reasons: rep.recent_failure_reasons.iter().cloned().collect(),
            })
            .await
            .map_err(|e| PolicyError::Store(e.to_string()))
    }

    #[must_use]
    pub fn domain_reputation(&self, domain: &str) -> Option<DomainReputation> {
        self.domains.get(domain).map(|r| r.clone())
    }

    #[must_use]
    pub fn mx_reputation(&self, mx_server: &str, domain: &str) -> Option<MxServerReputation> {
        self.mx_servers
            .get(&(mx_server.to_string(), domain.to_string()))
            .map(|r| r.clone())
    }

    /// Decides whether new admission should proceed for a recipient domain.
    #[must_use]
    pub fn check_delivery_allowed(&self, domain: &str) -> DeliveryAllowed {
        let Some(rep) = self.domains.get(domain) else {
            return DeliveryAllowed::AllowNewDomain;
        };

        if rep.tier() == ReputationTier::Blocked {
            return DeliveryAllowed::Deny {
                recommendation:
                    "domain reputation is blocked; review recent bounce/complaint volume before resuming sends",
            };
        }

        if rep.bounce_rate() > 0.10 {
            return DeliveryAllowed::Allow {
                warning: Some("high bounce"),
            };
        }

        DeliveryAllowed::Allow { warning: None }
    }

    /// Records a successful delivery outcome for `domain` (and, if known,
    /// the `mx_server` that accepted it).
    ///
    /// # Errors
    /// Returns an error if the backing store write fails; the in-memory
    /// cache has already been updated by the time this can happen.
    pub async fn record_success(
        &self,
        domain: &str,
        mx_server: Option<&str>,
        response_ms: f64,
        now: i64,
    ) -> Result<(), PolicyError> {
        let domain_rep = {
            let mut entry = self
                .domains
                .entry(domain.to_string())
                .or_insert_with(|| DomainReputation::new(domain.to_string()));
            entry.record_success(now);
            entry.clone()
        };
        self.persist_domain(&domain_rep).await?;

        if let Some(mx) = mx_server {
            let mx_rep = {
                let mut entry = self
                    .mx_servers
                    .entry((mx.to_string(), domain.to_string()))
                    .or_insert_with(|| MxServerReputation::new(mx.to_string(), domain.to_string()));
                entry.record_success(now, response_ms);
                entry.clone()
            };
            self.persist_mx(&mx_rep).await?;
        }

        Ok(())
    }

    /// Records a failed delivery outcome for `domain` (and, if known, the
    /// `mx_server` that produced it), with `reason` pushed onto the MX's
    /// bounded failure-reason ring buffer.
    ///
    /// # Errors
    /// Returns an error if the backing store write fails; the in-memory
    /// cache has already been updated by the time this can happen.
    pub async fn record_failure(
        &self,
        domain: &str,
        mx_server: Option<&str>,
        reason: &str,
        now: i64,
    ) -> Result<(), PolicyError> {
        let domain_rep = {
            let mut entry = self
                .domains
                .entry(domain.to_string())
                .or_insert_with(|| DomainReputation::new(domain.to_string()));
            entry.record_failure(now);
            entry.clone()
        };
        self.persist_domain(&domain_rep).await?;

        if let Some(mx) = mx_server {
            let mx_rep = {
                let mut entry = self
                    .mx_servers
                    .entry((mx.to_string(), domain.to_string()))
                    .or_insert_with(|| MxServerReputation::new(mx.to_string(), domain.to_string()));
                entry.record_failure(now, reason.to_string());
                entry.clone()
            };
            self.persist_mx(&mx_rep).await?;
        }

        Ok(())
    }

    /// Recomputes every domain's score from scratch using caller-supplied
    /// `(successful, failed)` counters derived from the last 30 days of
    /// `DeliveryAttempt` rows from a daily sweep. The engine has
    /// no direct store access; `sendcore-scheduler`'s daily job queries
    /// `sendcore-store` and feeds the aggregates back in here.
    ///
    /// # Errors
    /// Returns an error if the backing store write fails.
    pub async fn resweep_domain(
        &self,
        domain: &str,
        successful: u64,
        failed: u64,
        now: i64,
    ) -> Result<(), PolicyError> {
        let domain_rep = {
            let mut entry = self
                .domains
                .entry(domain.to_string())
                .or_insert_with(|| DomainReputation::new(domain.to_string()));
            entry.successful = successful;
            entry.failed = failed;
            entry.recompute(now, false);
            entry.clone()
        };
        self.persist_domain(&domain_rep).await
    }

    /// Drops all tracked reputation for a domain, for the control socket's
    /// manual reset command. The domain reverts to `AllowNewDomain` on the
    /// next admission check.
    ///
    /// # Errors
    /// Returns an error if the backing store delete fails.
    pub async fn reset_domain(&self, domain: &str) -> Result<bool, PolicyError> {
        let had_domain = self.domains.remove(domain).is_some();
        self.mx_servers.retain(|(_, d), _| d != domain);

        if let Some(store) = &self.store {
            store
                .delete_domain_reputation(domain)
                .await
                .map_err(|e| PolicyError::Store(e.to_string()))?;
            store
                .delete_mx_reputations_for_domain(domain)
                .await
                .map_err(|e| PolicyError::Store(e.to_string()))?;
        }

        Ok(had_domain)
    }

    /// Snapshot of every tracked domain's reputation, for the control
    /// socket's list command.
    #[must_use]
    pub fn all_domains(&self) -> Vec<DomainReputation> {
        self.domains.iter().map(|r| r.clone()).collect()
    }
}
