//! The `Enqueue` admission pipeline.

use rand::Rng;
use sendcore_policy::{DeliveryAllowed, ReputationEngine, SuppressionList};

use crate::error::AdmissionError;
use crate::tenant::TenantRegistry;

/// A fully-rendered message ready for delivery. Template rendering,
/// campaign composition, and HTTP ingestion are out-of-scope collaborators
/// that hand the core exactly this.
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    pub tenant_id: String,
    pub envelope_from: String,
    pub envelope_to: String,
    pub subject: String,
    pub body: String,
    pub message_id: Option<String>,
}

/// Result of a successful [`admit`] call.
#[derive(Debug, Clone)]
pub struct AdmissionResult {
    pub job_id: String,
    pub message_id: String,
    pub priority: i32,
}

fn validate_fields(req: &AdmissionRequest) -> Result<(), AdmissionError> {
    let mut failures = Vec::new();
    if req.tenant_id.trim().is_empty() {
        failures.push("tenant_id is required");
    }
    if !req.envelope_from.contains('@') {
        failures.push("envelope_from must be a valid address");
    }
    if !req.envelope_to.contains('@') {
        failures.push("envelope_to must be a valid address");
    }
    if req.body.is_empty() {
        failures.push("body must not be empty");
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(AdmissionError::ValidationError(failures))
    }
}

fn domain_of(address: &str) -> &str {
    address.split_once('@').map_or(address, |(_, domain)| domain)
}

fn generate_message_id(from_domain: &str, now_ms: i64) -> String {
    let suffix: u64 = rand::rng().random();
    format!("<{now_ms}.{suffix:016x}@{from_domain}>")
}

/// Priority bonus for a reputation score.
fn reputation_bonus(score: f64) -> i32 {
    if score >= 80.0 {
        10
    } else if score <= 30.0 {
        -10
    } else {
        0
    }
}

/// Runs the full 9-step admission pipeline and, on success, increments the
/// tenant's rolling counters. Callers still own persisting the job
/// (`sendcore-store`'s `Enqueue` + audit entry) — this function only
/// decides whether the message may be admitted and at what priority.
#[allow(clippy::too_many_arguments)]
pub fn admit(
    req: &AdmissionRequest,
    tenants: &TenantRegistry,
    suppression: &SuppressionList,
    reputation: &ReputationEngine,
    now_ms: i64,
) -> Result<AdmissionResult, AdmissionError> {
    admit_with_rollout(req, tenants, suppression, reputation, now_ms, 100)
}

/// Same as [`admit`], but consults the auto-rollback controller's current
/// rollout percent first, as the "config gate" spec.md's rollback controller
/// is described as writing to (the controller itself never touches the
/// in-flight delivery path). `rollout_percent` is `0..=100`; a deterministic
/// per-job dice roll against it decides whether this admission belongs to
/// the currently-enabled cohort.
#[allow(clippy::too_many_arguments)]
pub fn admit_with_rollout(
    req: &AdmissionRequest,
    tenants: &TenantRegistry,
    suppression: &SuppressionList,
    reputation: &ReputationEngine,
    now_ms: i64,
    rollout_percent: u8,
) -> Result<AdmissionResult, AdmissionError> {
    let now_secs = now_ms / 1000;

    // 0. Auto-rollback config gate: admissions outside the enabled rollout
    // cohort are rejected here, before any state is touched.
    if rollout_percent < 100 && rand::rng().random_range(0..100) >= u32::from(rollout_percent) {
        return Err(AdmissionError::RolledBack);
    }

    // 1. Required fields present and well-formed.
    validate_fields(req)?;

    // 2. Resolve tenant, require active, and validate the operation.
    let from_domain = domain_of(&req.envelope_from);
    tenants.validate_send(&req.tenant_id, from_domain, now_secs)?;
    let snapshot = tenants
        .get(&req.tenant_id, now_secs)
        .ok_or_else(|| AdmissionError::UnknownTenant(req.tenant_id.clone()))?;

    // 3. Recipient suppression check (case-insensitive).
    let recipient = req.envelope_to.to_lowercase();
    if suppression.is_suppressed(Some(&req.tenant_id), &recipient) {
        return Err(AdmissionError::Suppressed);
    }

    // 4. Recipient domain reputation gate.
    let recipient_domain = domain_of(&recipient);
    let mut warning = None;
    match reputation.check_delivery_allowed(recipient_domain) {
        DeliveryAllowed::Deny { recommendation } => {
            return Err(AdmissionError::ReputationBlocked(recommendation));
        }
        DeliveryAllowed::Allow { warning: w } => warning = w,
        DeliveryAllowed::AllowNewDomain => {}
    }
    if let Some(w) = warning {
        tracing::debug!(tenant = %req.tenant_id, domain = recipient_domain, warning = w, "admitting with reputation warning");
    }

    // 5. Priority: base 50 + plan bonus + reputation bonus + historical bonus.
    let domain_score = reputation
        .domain_reputation(recipient_domain)
        .map_or(100.0, |r| r.score);
    let mut priority = 50 + snapshot.config.plan.priority_bonus() + reputation_bonus(domain_score);
    if snapshot.config.historical_reputation >= 0.9 {
        priority += 5;
    }
    let priority = priority.clamp(0, 100);

    // 6. Generate a message-id if the caller didn't supply one.
    let message_id = req
        .message_id
        .clone()
        .unwrap_or_else(|| generate_message_id(from_domain, now_ms));

    // 7. Increment tenant counters (coupled to admission, not delivery).
    tenants.record_admission(&req.tenant_id, now_secs);

    // 8/9. Job id + persistence is the caller's responsibility.
    let job_id = {
        let suffix: u64 = rand::rng().random();
        format!("job-{now_ms:x}-{suffix:x}")
    };

    Ok(AdmissionResult {
        job_id,
        message_id,
        priority,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::{Plan, SendCaps, TenantConfig};
    use ahash::AHashSet;

    fn registry_with(tenant_id: &str) -> TenantRegistry {
        let registry = TenantRegistry::new();
        registry.upsert(TenantConfig {
            id: tenant_id.to_string(),
            active: true,
            plan: Plan::Enterprise,
            caps: SendCaps {
                per_minute: 100,
                hourly: 1000,
                daily: 10_000,
            },
            verified_sender_domains: AHashSet::from_iter(["acme.test".to_string()]),
            historical_reputation: 0.95,
        });
        registry
    }

    fn request(tenant_id: &str) -> AdmissionRequest {
        AdmissionRequest {
            tenant_id: tenant_id.to_string(),
            envelope_from: "alerts@acme.test".to_string(),
            envelope_to: "User@Example.com".to_string(),
            subject: "hello".to_string(),
            body: "body".to_string(),
            message_id: None,
        }
    }

    #[test]
    fn happy_path_admits_and_lowercases_recipient_for_suppression_check() {
        let tenants = registry_with("t1");
        let suppression = SuppressionList::default();
        let reputation = ReputationEngine::new();

        let result = admit(&request("t1"), &tenants, &suppression, &reputation, 1_000_000).unwrap();
        assert!(result.message_id.ends_with("@acme.test>"));
        // base 50 + enterprise plan bonus 20 + unseen-domain reputation bonus 10 + historical bonus 5.
        assert_eq!(result.priority, 50 + 20 + 10 + 5);
    }

    #[tokio::test]
    async fn suppressed_recipient_rejected() {
        let tenants = registry_with("t2");
        let suppression = SuppressionList::default();
        suppression
            .record(
                "user@example.com",
                sendcore_policy::SuppressionType::Manual,
                Some("unsubscribed".to_string()),
                Some("t2"),
                None,
                ahash::AHashMap::default(),
            )
            .await
            .unwrap();
        let reputation = ReputationEngine::new();

        let err = admit(&request("t2"), &tenants, &suppression, &reputation, 1_000_000).unwrap_err();
        assert!(matches!(err, AdmissionError::Suppressed));
    }

    #[tokio::test]
    async fn blocked_domain_reputation_rejected() {
        let tenants = registry_with("t3");
        let suppression = SuppressionList::default();
        let reputation = ReputationEngine::new();
        for i in 0..10 {
            reputation
                .record_failure("example.com", None, "rejected", 1_000 + i)
                .await
                .unwrap();
        }

        let err = admit(&request("t3"), &tenants, &suppression, &reputation, 1_000_000).unwrap_err();
        assert!(matches!(err, AdmissionError::ReputationBlocked(_)));
    }

    #[test]
    fn missing_message_id_is_generated() {
        let tenants = registry_with("t4");
        let suppression = SuppressionList::default();
        let reputation = ReputationEngine::new();

        let mut req = request("t4");
        req.message_id = Some("<caller-supplied@acme.test>".to_string());
        let result = admit(&req, &tenants, &suppression, &reputation, 1_000_000).unwrap();
        assert_eq!(result.message_id, "<caller-supplied@acme.test>");
    }

    #[test]
    fn zero_rollout_rejects_every_admission() {
        let tenants = registry_with("t5");
        let suppression = SuppressionList::default();
        let reputation = ReputationEngine::new();

        let err =
            admit_with_rollout(&request("t5"), &tenants, &suppression, &reputation, 1_000_000, 0)
                .unwrap_err();
        assert!(matches!(err, AdmissionError::RolledBack));
    }

    #[test]
    fn full_rollout_behaves_like_admit() {
        let tenants = registry_with("t6");
        let suppression = SuppressionList::default();
        let reputation = ReputationEngine::new();

        let result =
            admit_with_rollout(&request("t6"), &tenants, &suppression, &reputation, 1_000_000, 100)
                .unwrap();
        assert_eq!(result.priority, 50 + 20 + 10 + 5);
    }
}
