//! Wires every sub-crate into one running instance and drives it to
//! shutdown.

use std::{sync::Arc, sync::LazyLock};

use sendcore_common::{Domain, Signal, internal};
use sendcore_control::{ControlServer, SendcoreCommandHandler};
use sendcore_dkim::{InternalDomains, Keystore, RelationalKeyRepository, VerifiedDomainRegistry};
use sendcore_policy::{ReputationEngine, SuppressionList};
use sendcore_rollback::{HealthMetrics, RollbackController};
use sendcore_scheduler::DeliveryQueryService;
use sendcore_store::relational::RelationalStore;
use sendcore_tenant::{AdmissionService, TenantRegistry};
use tokio::sync::broadcast;

use crate::config::Config;

static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> =
    LazyLock::new(|| broadcast::channel(1).0);

async fn shutdown() -> anyhow::Result<()> {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
    internal!(level = INFO, "Shutdown signal received");
    let _ = SHUTDOWN_BROADCAST.send(Signal::Shutdown);

    // Wait for a second signal (operator impatience) or for every receiver
    // to finish and drop, whichever comes first.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        () = std::future::pending() => {}
    }
    Ok(())
}

/// Samples the delivery queue's current attempt history into the shape the
/// rollback controller's trigger table evaluates.
///
/// This is a point-in-time snapshot of in-flight state, not a rolling
/// window; `errors_baseline` always reads 0 so the `errors_v2`-vs-baseline
/// trigger never fires from this sampling path alone; it only guards
/// against the success-rate, latency, and simultaneous-error triggers.
fn sample_health_metrics(delivery: &dyn DeliveryQueryService) -> HealthMetrics {
    let messages = delivery.list_messages(None);
    let total = messages.len() as u64;
    let failed = messages
        .iter()
        .filter(|m| {
            matches!(
                m.status,
                sendcore_common::DeliveryStatus::Failed(_)
                    | sendcore_common::DeliveryStatus::Bounced(_)
            )
        })
        .count() as u64;
    let success_rate = if total == 0 {
        1.0
    } else {
        (total - failed) as f64 / total as f64
    };

    let mut attempt_errors: u64 = 0;
    for m in &messages {
        attempt_errors += m.attempts.iter().filter(|a| a.error.is_some()).count() as u64;
    }

    HealthMetrics {
        success_rate,
        p50_latency_ms: 0.0,
        errors_v2: attempt_errors,
        errors_baseline: 0,
        simultaneous_critical_errors: 0,
        error_trend_rising: false,
        errors: attempt_errors,
    }
}

impl Config {
    /// Runs this instance until a shutdown signal arrives.
    ///
    /// # Errors
    /// Propagates any initialization or fatal serving error from the
    /// collaborators this wires together (spool, SMTP listeners, delivery
    /// processor, control socket, health/metrics servers).
    pub async fn run(mut self) -> anyhow::Result<()> {
        sendcore_common::logging::init();
        internal!("Sendcore starting up");

        if self.metrics.enabled {
            sendcore_metrics::init_metrics(&self.metrics)?;
        }

        let spool = self.spool.clone().into_spool()?;
        let spool_store = Arc::new(spool);

        let store = Arc::new(RelationalStore::connect(&self.database.url).await?);

        let tenants = Arc::new(TenantRegistry::with_store(store.clone()));
        tenants.hydrate().await?;
        for tenant in self.tenants.drain(..) {
            tenants.upsert_durable(tenant).await?;
        }

        let reputation = Arc::new(ReputationEngine::with_store(store.clone()));
        reputation.hydrate().await?;
        let suppression = Arc::new(SuppressionList::with_store(store.clone()));
        suppression.hydrate().await?;

        let verified = VerifiedDomainRegistry::new(
            self.dkim
                .verified_domains
                .iter()
                .map(|d| Domain::new(d.clone())),
        );
        let internal_domains = InternalDomains::new(
            self.dkim
                .internal_domains
                .iter()
                .map(|d| Domain::new(d.clone())),
        );
        let keystore = Keystore::new(
            Arc::new(RelationalKeyRepository::new(store.clone())),
            Arc::new(verified),
            internal_domains,
            None,
            self.dkim.keystore.clone(),
        );
        let dkim: Arc<dyn sendcore_dkim::DkimService> = Arc::new(keystore);

        let rollback = Arc::new(RollbackController::new(
            self.rollback.clone(),
            self.initial_rollout_percent,
        ));

        self.smtp.init()?;
        self.smtp.with_spool(spool_store.backing_store());

        self.delivery.init(spool_store.backing_store(), None)?;
        let delivery = self
            .delivery
            .with_tenants(tenants.clone())
            .with_reputation(reputation.clone())
            .with_suppression(suppression.clone())
            .with_dkim(dkim);
        let delivery = Arc::new(delivery);

        let admission = Arc::new(
            AdmissionService::new(
                tenants.clone(),
                suppression.clone(),
                reputation.clone(),
                spool_store.backing_store(),
            )
            .with_rollback(rollback.clone())
            .with_store(store.clone()),
        );
        // The admission service is available to whichever ingress wires it
        // in (an HTTP API is an out-of-scope collaborator); kept alive here
        // so its spool handle stays valid for the lifetime of the process.
        let _admission = admission;

        let command_handler = Arc::new(SendcoreCommandHandler::new(
            delivery.clone(),
            tenants.clone(),
            reputation.clone(),
        ));
        let control_server = ControlServer::new(self.control.socket_path.clone(), command_handler)?
            .with_auth(self.control.auth.clone());

        let health_checker = Arc::new(sendcore_health::HealthChecker::new(
            self.health.max_queue_size,
        ));
        let health_server = if self.health.enabled {
            Some(sendcore_health::HealthServer::new(self.health.clone(), health_checker).await?)
        } else {
            None
        };

        let rollback_eval_interval = self.rollback_eval_interval_secs;
        let rollback_task_delivery = delivery.clone();
        let rollback_task_controller = rollback.clone();
        let mut rollback_shutdown = SHUTDOWN_BROADCAST.subscribe();
        let rollback_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
                rollback_eval_interval.max(1),
            ));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let metrics = sample_health_metrics(rollback_task_delivery.as_ref());
                        let now = chrono::Utc::now().timestamp();
                        rollback_task_controller.evaluate(&metrics, now);
                    }
                    sig = rollback_shutdown.recv() => {
                        if matches!(sig, Ok(Signal::Shutdown) | Err(_)) {
                            break;
                        }
                    }
                }
            }
        });

        let ret = tokio::select! {
            r = self.smtp.serve(SHUTDOWN_BROADCAST.subscribe()) => r,
            r = spool_store.serve(SHUTDOWN_BROADCAST.subscribe()) => r.map_err(anyhow::Error::from),
            r = delivery.clone().serve(SHUTDOWN_BROADCAST.subscribe()) => r.map_err(anyhow::Error::from),
            r = control_server.serve(SHUTDOWN_BROADCAST.subscribe()) => r.map_err(anyhow::Error::from),
            r = async move {
                match health_server {
                    Some(server) => server
                        .serve(SHUTDOWN_BROADCAST.subscribe())
                        .await
                        .map_err(anyhow::Error::from),
                    None => {
                        let mut rx = SHUTDOWN_BROADCAST.subscribe();
                        let _ = rx.recv().await;
                        Ok(())
                    }
                }
            } => r,
            r = shutdown() => r,
        };

        let _ = SHUTDOWN_BROADCAST.send(Signal::Shutdown);
        let _ = rollback_task.await;
        internal!("Sendcore shutting down");
        ret
    }
}
