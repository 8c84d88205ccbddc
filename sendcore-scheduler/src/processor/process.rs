//! Queue processing logic for delivery attempts

use std::sync::Arc;

use sendcore_common::{
    DeliveryStatus,
    tracing::{debug, error, warn},
};
use tokio::sync::Semaphore;

use crate::{
    dns::MailServer,
    error::DeliveryError,
    processor::{DeliveryProcessor, delivery::prepare_message},
    types::DeliveryInfo,
};

/// Orders the set of pending-and-ready messages for this dispatch round.
///
/// Without a configured [`sendcore_tenant::TenantRegistry`], dispatch order
/// is unchanged from the flat queue scan, the degenerate single-tenant
/// case. With one configured, messages are grouped by tenant,
/// each tenant's jobs sorted by priority (desc) then queue time (asc), and
/// each tenant may contribute at most its plan's share of the round's global
/// concurrency cap — so one large tenant cannot starve the others.
fn select_dispatch_order(
    processor: &DeliveryProcessor,
    ready: Vec<DeliveryInfo>,
    now_secs: i64,
) -> Vec<DeliveryInfo> {
    let Some(tenants) = processor.tenants.as_ref() else {
        return ready;
    };

    let mut by_tenant: std::collections::HashMap<Option<Arc<str>>, Vec<DeliveryInfo>> =
        std::collections::HashMap::new();
    for info in ready {
        by_tenant.entry(info.tenant_id.clone()).or_default().push(info);
    }

    for jobs in by_tenant.values_mut() {
        jobs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.queued_at.cmp(&b.queued_at)));
    }

    // Sort tenant keys for deterministic round-robin order across ticks.
    let mut tenant_ids: Vec<_> = by_tenant.keys().cloned().collect();
    tenant_ids.sort();

    let mut remaining_global = processor.max_concurrent_deliveries.max(1);
    let mut dispatch = Vec::new();

    for tenant_id in tenant_ids {
        if remaining_global == 0 {
            break;
        }
        let Some(jobs) = by_tenant.remove(&tenant_id) else {
            continue;
        };
        let share = tenant_id
            .as_deref()
            .and_then(|id| tenants.get(id, now_secs))
            .map_or(jobs.len(), |snapshot| snapshot.config.plan.plan_share());
        let take = share.min(remaining_global).min(jobs.len());
        remaining_global -= take;
        dispatch.extend(jobs.into_iter().take(take));
    }

    dispatch
}

/// Process all pending messages in the queue.
///
/// This method:
/// 1. Checks for expired messages and marks them as `Expired`
/// 2. For messages with `Retry` status, checks if it's time to retry
/// 3. Dispatches messages that are ready for delivery onto their own worker
///    task, bounded by `max_concurrent_deliveries`: the in-flight counter
///    never exceeds the configured concurrency cap.
///
/// # Errors
/// Returns an error if processing fails
#[allow(
    clippy::too_many_lines,
    reason = "Queue processing logic naturally requires many branches"
)]
pub async fn process_queue_internal(
    processor: Arc<DeliveryProcessor>,
    spool: Arc<dyn sendcore_store::BackingStore>,
) -> Result<(), DeliveryError> {
    let current_time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    // Get all messages to check for expiration and retry timing
    let all_messages = processor.queue.all_messages();
    let semaphore = Arc::new(Semaphore::new(processor.max_concurrent_deliveries.max(1)));
    let mut workers = Vec::new();
    let mut ready = Vec::new();

    for info in all_messages {
        // Skip messages that are already completed, failed, expired, or in progress
        if matches!(
            info.status,
            DeliveryStatus::Completed
                | DeliveryStatus::Failed(_)
                | DeliveryStatus::Expired
                | DeliveryStatus::InProgress
        ) {
            continue;
        }

        // Check if message has expired
        if let Some(expiration_secs) = processor.message_expiration_secs {
            let age_secs = current_time.saturating_sub(info.queued_at);
            if age_secs > expiration_secs {
                warn!(
                    message_id = ?info.message_id,
                    age_secs = age_secs,
                    expiration_secs = expiration_secs,
                    "Message expired, marking as Expired"
                );
                processor
                    .queue
                    .update_status(&info.message_id, DeliveryStatus::Expired);

                if let Err(e) =
                    super::delivery::persist_delivery_state(&processor, &info.message_id, &spool)
                        .await
                {
                    warn!(
                        message_id = ?info.message_id,
                        error = %e,
                        "Failed to persist delivery state after marking message as Expired"
                    );
                }

                continue;
            }
        }

        // For Retry status, check if it's time to retry
        if matches!(info.status, DeliveryStatus::Retry { .. }) {
            if let Some(next_retry_at) = info.next_retry_at
                && current_time < next_retry_at
            {
                // Not yet time to retry, skip this message
                let wait_secs = next_retry_at.saturating_sub(current_time);
                debug!(
                    message_id = ?info.message_id,
                    wait_secs = wait_secs,
                    "Skipping message, not yet time to retry"
                );
                continue;
            }

            // Time to retry! Reset status to Pending and reset server index
            debug!(
                message_id = ?info.message_id,
                attempt = info.attempt_count(),
                "Time to retry delivery"
            );
            processor
                .queue
                .update_status(&info.message_id, DeliveryStatus::Pending);

            // Reset to first MX server for new retry cycle
            processor.queue.reset_server_index(&info.message_id);

            if let Err(e) =
                super::delivery::persist_delivery_state(&processor, &info.message_id, &spool).await
            {
                warn!(
                    message_id = ?info.message_id,
                    error = %e,
                    "Failed to persist delivery state after marking message for retry"
                );
            }
        }

        // Collect ready messages; dispatch order (and fair-share among
        // tenants) is decided once the whole queue has been scanned.
        if matches!(info.status, DeliveryStatus::Pending) {
            ready.push(info);
        }
    }

    #[allow(clippy::cast_possible_wrap, reason = "current_time is seconds since 1970, far from i64::MAX")]
    let dispatch_order = select_dispatch_order(&processor, ready, current_time as i64);

    for info in dispatch_order {
        let processor = Arc::clone(&processor);
        let spool = Arc::clone(&spool);
        let permit = Arc::clone(&semaphore);
        let message_id = info.message_id.clone();
        let mail_servers = Arc::clone(&info.mail_servers);
        let current_server_index = info.current_server_index;
        let recipient_domain = info.recipient_domain.clone();

        workers.push(tokio::spawn(async move {
            let _permit = permit.acquire_owned().await;

            if let Err(e) = prepare_message(&processor, &message_id, &spool).await {
                error!(
                    message_id = ?message_id,
                    error = %e,
                    "Failed to prepare message for delivery"
                );

                if let Ok(mut context) = spool.read(&message_id).await {
                    let server = mail_servers
                        .get(current_server_index)
                        .map_or_else(|| recipient_domain.to_string(), MailServer::address);
                    let _error = super::delivery::handle_delivery_error(
                        &processor,
                        &message_id,
                        &mut context,
                        e,
                        server,
                    )
                    .await;
                }
            }
        }));
    }

    for worker in workers {
        if let Err(e) = worker.await {
            error!(error = %e, "Delivery worker task panicked");
        }
    }

    Ok(())
}
