//! Spool scanning logic for discovering new messages

use std::sync::Arc;

use sendcore_common::{context::Context, tracing::warn};

use crate::{
    error::{DeliveryError, SystemError},
    processor::DeliveryProcessor,
    types::DeliveryInfo,
};

/// Extract domain from an email address
///
/// # Errors
/// Returns an error if the email address format is invalid or has no domain part
pub fn extract_domain(email: &str) -> Result<String, DeliveryError> {
    // Remove angle brackets if present
    let cleaned = email.trim().trim_matches(|c| c == '<' || c == '>');

    // Split on @ and get the domain part
    cleaned
        .split('@')
        .nth(1)
        .map(|domain| domain.trim().to_string())
        .filter(|domain| !domain.is_empty())
        .ok_or_else(|| {
            SystemError::Internal(format!(
                "Invalid email address: no domain found in '{email}'"
            ))
            .into()
        })
}

/// Tenant id for a message, preferring persisted delivery state over the raw
/// metadata set at admission time.
fn tenant_of(context: &Context) -> Option<Arc<str>> {
    context
        .delivery
        .as_ref()
        .and_then(|d| d.tenant_id.clone())
        .or_else(|| context.metadata.get("tenant_id").cloned())
        .map(Arc::from)
}

/// Priority for a message, preferring persisted delivery state over the raw
/// metadata set at admission time. Defaults to 50 (the admission baseline).
fn priority_of(context: &Context) -> i32 {
    if let Some(delivery) = &context.delivery {
        return delivery.priority;
    }
    context
        .metadata
        .get("priority")
        .and_then(|p| p.parse::<i32>().ok())
        .unwrap_or(50)
}

/// Scan the spool for new messages and add them to the queue
///
/// # Errors
/// Returns an error if the spool cannot be read
pub async fn scan_spool_internal(
    processor: &DeliveryProcessor,
    spool: &Arc<dyn sendcore_store::BackingStore>,
) -> Result<usize, DeliveryError> {
    let message_ids = spool
        .list()
        .await
        .map_err(|e| SystemError::SpoolRead(e.to_string()))?;
    let mut added = 0;

    for msg_id in message_ids {
        // Check if already in queue
        if processor.queue.get(&msg_id).is_some() {
            continue;
        }

        // Read the message to get context (potentially with delivery state)
        let context = spool
            .read(&msg_id)
            .await
            .map_err(|e| SystemError::SpoolRead(e.to_string()))?;

        // Check if this message already has delivery state persisted
        if let Some(delivery_ctx) = &context.delivery {
            // A message still `InProgress` when the spool was last written
            // either crashed mid-attempt or was orphaned by an unclean
            // shutdown (this scan only runs at startup and periodically;
            // nothing else would leave an entry InProgress with no worker
            // holding it). Fold it back to Pending so it is picked up and
            // retried rather than leaking forever (P8: at-least-once).
            let status = if delivery_ctx.status == sendcore_common::DeliveryStatus::InProgress {
                sendcore_common::DeliveryStatus::Pending
            } else {
                delivery_ctx.status.clone()
            };

            // Restore from persisted state
            let info = DeliveryInfo {
                message_id: msg_id.clone(),
                status,
                attempts: delivery_ctx.attempt_history.clone(),
                recipient_domain: delivery_ctx.domain.clone(),
                mail_servers: Arc::new(Vec::new()), // Will be resolved again if needed
                current_server_index: delivery_ctx.current_server_index,
                queued_at: delivery_ctx.queued_at,
                next_retry_at: delivery_ctx.next_retry_at,
                tenant_id: tenant_of(&context),
                priority: priority_of(&context),
                cancel_requested: false,
            };

            // Add to queue with existing state
            processor.queue.insert(msg_id.clone(), info);
            added += 1;
            continue;
        }

        // New message without delivery state - create fresh DeliveryInfo
        // Group recipients by domain (handle multi-recipient messages)
        let Some(recipients) = context.envelope.recipients() else {
            warn!("Message {:?} has no recipients, skipping", msg_id);
            continue;
        };

        // Collect unique domains from all recipients
        let mut domains = std::collections::HashMap::new();
        for recipient in recipients.iter() {
            // Extract the actual email address from the MailAddr
            let recipient_str = match &**recipient {
                mailparse::MailAddr::Single(single) => &single.addr,
                mailparse::MailAddr::Group(_) => continue, // Skip groups
            };

            match extract_domain(recipient_str) {
                Ok(domain) => {
                    domains
                        .entry(domain)
                        .or_insert_with(Vec::new)
                        .push(recipient_str.to_owned());
                }
                Err(e) => {
                    warn!(
                        message_id = ?msg_id,
                        recipient = %recipient_str,
                        error = %e,
                        "Failed to extract domain from recipient, skipping"
                    );
                }
            }
        }

        // Enqueue for each unique domain, carrying tenant/priority for
        // fair-share scheduling.
        let tenant_id = tenant_of(&context);
        let priority = priority_of(&context);
        for (domain, _recipients) in domains {
            processor.queue.enqueue_for_tenant(
                msg_id.clone(),
                domain,
                tenant_id.clone(),
                priority,
            );
            added += 1;
        }
    }

    Ok(added)
}

/// Reclaims messages that have been `InProgress` longer than
/// `processor.inflight_leak_threshold_secs`, flips them to `Pending` in the
/// in-memory queue, and persists the new status to the spool so a
/// subsequent cold restart doesn't rediscover them as `InProgress` and
/// re-derive the same fold-back independently.
///
/// This is the live-process counterpart to the `InProgress` → `Pending`
/// fold-back in [`scan_spool_internal`], which only runs at startup and on
/// the next scan tick for messages *not already* in the in-memory queue.
/// A message already in the queue never goes through that path again, so
/// without this sweep a worker that died mid-delivery would leave its job
/// `InProgress` forever.
///
/// # Errors
/// Returns an error if persisting a reclaimed message's status fails.
pub async fn sweep_inflight_leaks(
    processor: &crate::processor::DeliveryProcessor,
    spool: &Arc<dyn sendcore_store::BackingStore>,
) -> Result<usize, DeliveryError> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let reclaimed = processor
        .queue
        .sweep_inflight_leaks(now, processor.inflight_leak_threshold_secs);

    for message_id in &reclaimed {
        warn!(
            message_id = ?message_id,
            threshold_secs = processor.inflight_leak_threshold_secs,
            "reclaiming message stuck InProgress past the inflight-leak threshold"
        );
        crate::processor::delivery::persist_delivery_state(processor, message_id, spool).await?;
    }

    Ok(reclaimed.len())
}
