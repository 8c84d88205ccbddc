//! Bridges the admission pipeline to the spool.
//!
//! [`AdmissionService`] is the seam between tenant-facing ingress (HTTP API,
//! batch import, whatever hands in an [`AdmissionRequest`]) and the
//! scheduler: it runs the pipeline in [`admission`](crate::admission), renders
//! a minimal RFC 5322 message, and writes it to the spool with the metadata
//! keys the scheduler's periodic scan already knows how to pick up
//! (`tenant_id`, `priority`). It does not touch the delivery queue directly.

use std::sync::Arc;

use dashmap::DashSet;
use mailparse::{MailAddr, SingleInfo};
use sendcore_common::{address::Address, context::Context};
use sendcore_policy::{ReputationEngine, SuppressionList};
use sendcore_rollback::RollbackController;
use sendcore_store::relational::RelationalStore;
use sendcore_store::BackingStore;

use crate::admission::{self, AdmissionRequest, AdmissionResult};
use crate::error::AdmissionError;
use crate::tenant::TenantRegistry;

fn address_of(email: &str) -> Address {
    Address::from(MailAddr::Single(SingleInfo {
        addr: email.to_string(),
        display_name: None,
    }))
}

/// Renders a minimal RFC 5322 message: headers, a blank line, then the body.
///
/// This is the exact format the scheduler's DKIM signing step expects to
/// split on (`\r\n\r\n`), so anything produced here must stay in sync with
/// how it parses header lines back out.
fn render_message(req: &AdmissionRequest, result: &AdmissionResult, now_ms: i64) -> Vec<u8> {
    let date = chrono::DateTime::from_timestamp_millis(now_ms)
        .unwrap_or_default()
        .to_rfc2822();
    let headers = format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\nMessage-ID: {message_id}\r\nDate: {date}",
        from = req.envelope_from,
        to = req.envelope_to,
        subject = req.subject,
        message_id = result.message_id,
    );
    format!("{headers}\r\n\r\n{body}", body = req.body).into_bytes()
}

/// Wires the admission pipeline to the durable spool.
///
/// Owns the collaborators [`admission::admit_with_rollout`] needs plus the
/// backing store the admitted message is written to. The rollout percent
/// consulted on each admission is read fresh from `rollback` (if present),
/// so a live rollback decision takes effect on the very next call.
pub struct AdmissionService {
    tenants: Arc<TenantRegistry>,
    suppression: Arc<SuppressionList>,
    reputation: Arc<ReputationEngine>,
    spool: Arc<dyn BackingStore>,
    rollback: Option<Arc<RollbackController>>,
    /// Message-ids admitted by this instance so far (I4: message-id is
    /// unique across all jobs ever enqueued). This in-process cache catches
    /// a duplicate without a round-trip when `store` is absent (tests, or a
    /// durability-less deployment); when `store` is present it's a fast path
    /// in front of [`RelationalStore::reserve_message_id`], which is the
    /// real enforcement point since it survives a process restart.
    seen_message_ids: DashSet<String>,
    store: Option<Arc<RelationalStore>>,
}

impl AdmissionService {
    #[must_use]
    pub fn new(
        tenants: Arc<TenantRegistry>,
        suppression: Arc<SuppressionList>,
        reputation: Arc<ReputationEngine>,
        spool: Arc<dyn BackingStore>,
    ) -> Self {
        Self {
            tenants,
            suppression,
            reputation,
            spool,
            rollback: None,
            seen_message_ids: DashSet::new(),
            store: None,
        }
    }

    #[must_use]
    pub fn with_rollback(mut self, rollback: Arc<RollbackController>) -> Self {
        self.rollback = Some(rollback);
        self
    }

    /// Enables durable I4 enforcement: message-id uniqueness is checked
    /// against [`RelationalStore`], not just this instance's in-memory set.
    #[must_use]
    pub fn with_store(mut self, store: Arc<RelationalStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Runs the admission pipeline and, on success, spools the rendered
    /// message with the tenant and priority metadata the scheduler's spool
    /// scan reads when it first discovers a message.
    ///
    /// # Errors
    /// Returns the [`AdmissionError`] the pipeline produced, or
    /// [`AdmissionError::StoreUnavailable`] if the spool write fails.
    pub async fn submit(
        &self,
        req: AdmissionRequest,
        now_ms: i64,
    ) -> Result<AdmissionResult, AdmissionError> {
        let rollout_percent = self.rollback.as_ref().map_or(100, |r| r.rollout_percent());
        let result = admission::admit_with_rollout(
            &req,
            &self.tenants,
            &self.suppression,
            &self.reputation,
            now_ms,
            rollout_percent,
        )?;

        // I4: message-id uniqueness is an admission-time rejection, not a
        // store-level collision discovered later. The in-process set is
        // only marked once the durable reservation (when configured) has
        // actually succeeded, so a transient store error doesn't poison the
        // id for the rest of the process's lifetime.
        if self.seen_message_ids.contains(&result.message_id) {
            return Err(AdmissionError::DuplicateMessage);
        }

        if let Some(store) = &self.store {
            let reserved = store
                .reserve_message_id(&result.message_id, now_ms / 1000)
                .await
                .map_err(|e| AdmissionError::StoreUnavailable(e.to_string()))?;
            if !reserved {
                return Err(AdmissionError::DuplicateMessage);
            }
        }

        if !self.seen_message_ids.insert(result.message_id.clone()) {
            return Err(AdmissionError::DuplicateMessage);
        }

        let data = render_message(&req, &result, now_ms);
        let mut context = Context {
            id: result.job_id.clone(),
            data: Some(Arc::from(data.into_boxed_slice())),
            ..Context::default()
        };
        *context.envelope.sender_mut() = Some(address_of(&req.envelope_from));
        *context.envelope.recipients_mut() =
            Some(vec![address_of(&req.envelope_to)].into());
        context
            .metadata
            .insert("tenant_id".to_string(), req.tenant_id.clone());
        context
            .metadata
            .insert("priority".to_string(), result.priority.to_string());
        context
            .metadata
            .insert("message_id".to_string(), result.message_id.clone());

        self.spool
            .write(&mut context)
            .await
            .map_err(|e| AdmissionError::StoreUnavailable(e.to_string()))?;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use ahash::AHashSet;
    use sendcore_store::MemoryBackingStore;

    use super::*;
    use crate::tenant::{Plan, SendCaps, TenantConfig};

    fn tenants_with(tenant_id: &str) -> TenantRegistry {
        let registry = TenantRegistry::new();
        registry.upsert(TenantConfig {
            id: tenant_id.to_string(),
            active: true,
            plan: Plan::Professional,
            caps: SendCaps {
                per_minute: 100,
                hourly: 1000,
                daily: 10_000,
            },
            verified_sender_domains: AHashSet::from_iter(["acme.test".to_string()]),
            historical_reputation: 0.5,
        });
        registry
    }

    fn request() -> AdmissionRequest {
        AdmissionRequest {
            tenant_id: "t1".to_string(),
            envelope_from: "alerts@acme.test".to_string(),
            envelope_to: "user@example.com".to_string(),
            subject: "hello".to_string(),
            body: "hi there".to_string(),
            message_id: None,
        }
    }

    #[tokio::test]
    async fn admitted_message_lands_in_spool_with_tenant_metadata() {
        let service = AdmissionService::new(
            Arc::new(tenants_with("t1")),
            Arc::new(SuppressionList::default()),
            Arc::new(ReputationEngine::new()),
            Arc::new(MemoryBackingStore::default()),
        );

        let result = service.submit(request(), 1_000_000).await.unwrap();
        assert!(result.message_id.ends_with("@acme.test>"));

        let ids = service.spool.list().await.unwrap();
        assert_eq!(ids.len(), 1);
        let spooled = service.spool.read(&ids[0]).await.unwrap();
        assert_eq!(spooled.metadata.get("tenant_id"), Some(&"t1".to_string()));
        assert_eq!(
            spooled.metadata.get("priority"),
            Some(&result.priority.to_string())
        );
    }

    #[tokio::test]
    async fn duplicate_message_id_rejected_on_second_admission() {
        let service = AdmissionService::new(
            Arc::new(tenants_with("t1")),
            Arc::new(SuppressionList::default()),
            Arc::new(ReputationEngine::new()),
            Arc::new(MemoryBackingStore::default()),
        );

        let mut req = request();
        req.message_id = Some("<fixed-id@acme.test>".to_string());
        service.submit(req.clone(), 1_000_000).await.unwrap();

        let err = service.submit(req, 1_000_001).await.unwrap_err();
        assert!(matches!(err, AdmissionError::DuplicateMessage));
        assert_eq!(service.spool.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn suppressed_recipient_never_reaches_the_spool() {
        let suppression = SuppressionList::default();
        suppression
            .record(
                "user@example.com",
                sendcore_policy::SuppressionType::Manual,
                Some("unsubscribed".to_string()),
                Some("t1"),
                None,
                ahash::AHashMap::default(),
            )
            .await
            .unwrap();
        let service = AdmissionService::new(
            Arc::new(tenants_with("t1")),
            Arc::new(suppression),
            Arc::new(ReputationEngine::new()),
            Arc::new(MemoryBackingStore::default()),
        );

        let err = service.submit(request(), 1_000_000).await.unwrap_err();
        assert!(matches!(err, AdmissionError::Suppressed));
        assert!(service.spool.list().await.unwrap().is_empty());
    }
}
