//! Message delivery logic and error handling

use std::sync::Arc;

use sendcore_common::{
    DeliveryStatus,
    context::{Context, DeliveryContext},
    internal,
    tracing::{error, info, warn},
};
use sendcore_store::SpooledMessageId;

use crate::{
    dns::MailServer,
    error::{DeliveryError, PermanentError, SystemError},
    processor::DeliveryProcessor,
    types::DeliveryInfo,
};

/// Builds the `Context.delivery` snapshot written alongside the message on
/// every state transition, carrying over `info`'s tenant/priority and the
/// server/error detail specific to the transition being recorded.
fn delivery_context_for(
    message_id: &SpooledMessageId,
    info: &DeliveryInfo,
    server: Option<String>,
    error: Option<String>,
) -> DeliveryContext {
    let delivered_at = matches!(info.status, DeliveryStatus::Completed).then(current_unix_time_u64);
    DeliveryContext {
        message_id: message_id.to_string(),
        domain: info.recipient_domain.clone(),
        server,
        error,
        attempts: Some(info.attempt_count()),
        status: info.status.clone(),
        attempt_history: info.attempts.clone(),
        queued_at: info.queued_at,
        next_retry_at: info.next_retry_at,
        current_server_index: info.current_server_index,
        tenant_id: info.tenant_id.as_deref().map(ToString::to_string),
        priority: info.priority,
        bounce_classification: None,
        delivered_at,
        delivery_time_ms: None,
    }
}

fn current_unix_time_u64() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Prepare a message for delivery using SMTP client (but don't actually send it yet)
///
/// This method:
/// 1. Reads the message from the spool
/// 2. Performs DNS MX lookup for the recipient domain
/// 3. Connects to the MX server via SMTP
/// 4. Performs EHLO/HELO handshake
/// 5. Validates MAIL FROM and RCPT TO
/// 6. Does NOT send DATA (that's for actual delivery)
///
/// # Errors
/// Returns an error if the message cannot be read, DNS lookup fails, or SMTP connection fails
#[allow(
    clippy::too_many_lines,
    reason = "Persistence logic adds necessary lines"
)]
pub async fn prepare_message(
    processor: &DeliveryProcessor,
    message_id: &SpooledMessageId,
    spool: &Arc<dyn sendcore_store::BackingStore>,
) -> Result<(), DeliveryError> {
    processor
        .queue
        .update_status(message_id, DeliveryStatus::InProgress);

    // Persist the InProgress status to spool
    if let Err(e) = persist_delivery_state(processor, message_id, spool).await {
        warn!(
            message_id = ?message_id,
            error = %e,
            "Failed to persist delivery state after status update to InProgress"
        );
        // Continue anyway - this is not critical for delivery
    }

    let mut context = spool
        .read(message_id)
        .await
        .map_err(|e| SystemError::SpoolRead(e.to_string()))?;
    let info = processor.queue.get(message_id).ok_or_else(|| {
        SystemError::MessageNotFound(format!("Message {message_id:?} not in queue"))
    })?;

    context.delivery = Some(delivery_context_for(message_id, &info, None, None));

    // Re-check tenant and reputation immediately before the attempt, since
    // either may have changed since admission.
    recheck_tenant_and_reputation(processor, &info).await?;

    // Fetch/generate the DKIM key for the envelope-from domain and sign the
    // message, inserting the DKIM-Signature header. A domain with no
    // verified sender record is a terminal failure, not a retry.
    sign_with_dkim(processor, &mut context).await?;

    // Check for domain-specific MX override first (for testing/debugging)
    let mail_servers = if let Some(domain_config) = processor.domains.get(&info.recipient_domain)
        && let Some(mx_override) = domain_config.mx_override_address()
    {
        internal!(
            "Using MX override for {}: {}",
            info.recipient_domain,
            mx_override
        );

        // Parse host:port or use default port 25
        let (host, port) = if let Some((h, p)) = mx_override.split_once(':') {
            (h.to_string(), p.parse::<u16>().unwrap_or(25))
        } else {
            (mx_override.to_string(), 25)
        };

        Arc::new(vec![MailServer {
            host,
            port,
            priority: 0,
        }])
    } else if let Some(smart_host) = &processor.smart_host {
        let (host, port) = smart_host.host_port();
        internal!(
            "Using configured smart-host for {}: {}:{}",
            info.recipient_domain,
            host,
            port
        );
        Arc::new(vec![MailServer {
            host,
            port,
            priority: 0,
        }])
    } else {
        // Get the DNS resolver
        let Some(dns_resolver) = &processor.dns_resolver else {
            return Err(SystemError::NotInitialized(
                "DNS resolver not initialized. Call init() first.".to_string(),
            )
            .into());
        };

        // Perform real DNS MX lookup for the recipient domain
        // DNS errors are automatically converted to DeliveryError via From<DnsError>
        let resolved = dns_resolver
            .resolve_mail_servers(&info.recipient_domain)
            .await?;

        if resolved.is_empty() {
            return Err(PermanentError::NoMailServers(info.recipient_domain.to_string()).into());
        }

        resolved
    };

    // Store the resolved mail servers
    processor
        .queue
        .set_mail_servers(message_id, mail_servers.clone());

    // Use the first (highest priority) mail server
    let primary_server = &mail_servers[0];
    let mx_address = primary_server.address();

    internal!(
        "Sending message to {:?} with MX host {} (priority {})",
        message_id,
        mx_address,
        primary_server.priority
    );

    context.delivery = Some(delivery_context_for(
        message_id,
        &info,
        Some(mx_address.clone()),
        None,
    ));

    // Deliver the message via SMTP (including DATA command)
    let attempt_started = std::time::Instant::now();
    let result = deliver_message(processor, &mx_address, &context, &info).await;

    // A cancellation requested while this attempt was in flight is never
    // aborted mid-session; it takes effect now, once the attempt has
    // actually finished, overriding whatever outcome the attempt produced.
    let cancelled = processor
        .queue
        .get(message_id)
        .is_some_and(|i| i.cancel_requested);

    match result {
        Ok(()) if cancelled => {
            processor
                .queue
                .update_status(message_id, DeliveryStatus::Failed("cancelled".to_string()));

            if let Err(e) = persist_delivery_state(processor, message_id, spool).await {
                warn!(
                    message_id = ?message_id,
                    error = %e,
                    "Failed to persist delivery state after cancelled delivery completed"
                );
            }
            if let Err(e) = spool.delete(message_id).await {
                error!(
                    message_id = ?message_id,
                    error = %e,
                    "Failed to delete message from spool after cancelled delivery completed"
                );
            }

            Ok(())
        }
        Ok(()) => {
            processor
                .queue
                .update_status(message_id, DeliveryStatus::Completed);

            // Feed the reputation engine a positive outcome for the
            // recipient domain and MX.
            if let Some(reputation) = processor.reputation.as_ref() {
                #[allow(clippy::cast_precision_loss)]
                let response_ms = attempt_started.elapsed().as_millis() as f64;
                let now = current_unix_time();
                if let Err(e) = reputation
                    .record_success(&info.recipient_domain, Some(&mx_address), response_ms, now)
                    .await
                {
                    warn!(error = %e, "Failed to persist reputation update after successful delivery");
                }
            }

            // Persist the Completed status to spool before deletion
            // Note: This will be immediately deleted, but it's important for consistency
            // in case the deletion fails
            if let Err(e) = persist_delivery_state(processor, message_id, spool).await {
                warn!(
                    message_id = ?message_id,
                    error = %e,
                    "Failed to persist delivery state after successful delivery"
                );
            }

            // Delete the message from the spool after successful delivery
            if let Err(e) = spool.delete(message_id).await {
                error!(
                    message_id = ?message_id,
                    error = %e,
                    "Failed to delete message from spool after successful delivery"
                );
                // Don't fail the delivery just because we couldn't delete the spool file
                // The message was delivered successfully
            }

            let mut completed_info = info.clone();
            completed_info.status = DeliveryStatus::Completed;
            context.delivery = Some(delivery_context_for(
                message_id,
                &completed_info,
                Some(mx_address.clone()),
                None,
            ));

            Ok(())
        }
        Err(e) => {
            let error =
                handle_delivery_error(processor, message_id, &mut context, e, mx_address).await;
            Err(error)
        }
    }
}

/// Handle a failed delivery attempt and update status based on retry policy
///
/// Records the attempt and determines whether to retry or mark as permanently failed.
/// Implements MX server fallback: tries lower-priority MX servers before counting as a retry.
/// Dispatches `DeliveryFailure` event to modules.
///
/// # Errors
/// Returns the original error after recording it
#[allow(
    clippy::too_many_lines,
    reason = "Persistence logic adds necessary lines"
)]
pub async fn handle_delivery_error(
    processor: &DeliveryProcessor,
    message_id: &SpooledMessageId,
    context: &mut Context,
    error: DeliveryError,
    server: String,
) -> DeliveryError {
    // Record the attempt
    let attempt = sendcore_common::DeliveryAttempt {
        timestamp: std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        error: Some(error.to_string()),
        server: server.clone(),
    };

    processor.queue.record_attempt(message_id, attempt);

    // Get updated info to check attempt count
    // Use proper error handling instead of unwrap
    let Some(updated_info) = processor.queue.get(message_id) else {
        warn!(
            "Message {:?} disappeared from queue during error handling",
            message_id
        );
        return error; // Preserve original error
    };

    // Check if this is a temporary failure that warrants trying another MX server
    // (e.g., connection refused, timeout, temporary SMTP error)
    let is_temporary_failure = error.is_temporary();

    // A cancellation requested while this attempt was in flight pre-empts
    // both the MX-fallback retry and the normal bounce/retry/fail
    // classification below: the job moves straight to its terminal
    // cancelled state once the attempt that was already underway finishes.
    if updated_info.cancel_requested {
        processor
            .queue
            .update_status(message_id, DeliveryStatus::Failed("cancelled".to_string()));
        if let Some(spool) = &processor.spool
            && let Err(e) = persist_delivery_state(processor, message_id, spool).await
        {
            warn!(
                message_id = ?message_id,
                error = %e,
                "Failed to persist delivery state after cancelled delivery failed"
            );
        }
        return error;
    }

    // Try next MX server if this was a temporary failure
    if is_temporary_failure
        && processor.queue.try_next_server(message_id)
        && let Some(info) = processor.queue.get(message_id)
        && let Some(next_server) = info.current_mail_server()
    {
        info!(
            "Trying next MX server for {:?}: {} (priority {})",
            message_id, next_server.host, next_server.priority
        );
        // Set status back to Pending to retry immediately with next server
        processor
            .queue
            .update_status(message_id, DeliveryStatus::Pending);

        // Persist the Pending status for next MX server attempt
        if let Some(spool) = &processor.spool
            && let Err(e) = persist_delivery_state(processor, message_id, spool).await
        {
            warn!(
                message_id = ?message_id,
                error = %e,
                "Failed to persist delivery state after MX server fallback"
            );
        }

        return error;
    }

    // Feed the reputation engine a negative outcome, regardless of whether
    // the job ultimately retries or terminates.
    if let Some(reputation) = processor.reputation.as_ref() {
        if let Err(e) = reputation
            .record_failure(
                &updated_info.recipient_domain,
                Some(&server),
                &error.to_string(),
                current_unix_time(),
            )
            .await
        {
            warn!(error = %e, "Failed to persist reputation update after failed delivery");
        }
    }

    // All MX servers exhausted or permanent failure, use normal retry logic.
    // A permanent (5xx) failure is classified against the bounce rules:
    // hard/block bounces are terminal and absorbed into the suppression
    // list; everything else falls back to the ordinary retry-cap logic.
    let bounce = error
        .is_permanent()
        .then(|| sendcore_policy::classify_bounce(&error.to_string()))
        .filter(|bt| {
            matches!(
                bt,
                sendcore_policy::BounceType::Hard | sendcore_policy::BounceType::Block
            )
        });

    let new_status = if let Some(bounce_type) = bounce {
        if let Some(suppression) = processor.suppression.as_ref()
            && let Some(recipient) = recipient_for_domain(context, &updated_info.recipient_domain)
        {
            if let Err(e) = suppression
                .record(
                    &recipient,
                    sendcore_policy::SuppressionType::Bounce,
                    Some(error.to_string()),
                    updated_info.tenant_id.as_deref(),
                    Some(bounce_type),
                    ahash::AHashMap::default(),
                )
                .await
            {
                warn!(message_id = ?message_id, error = %e, "failed to record bounce suppression");
            }
        }
        DeliveryStatus::Bounced(error.to_string())
    } else if error.is_permanent() {
        // Permanent, non-bounce failures (DKIM domain unverified, tenant
        // inactive, reputation-blocked) are terminal immediately; they are
        // not expected to succeed on a later attempt.
        DeliveryStatus::Failed(error.to_string())
    } else if !processor
        .retry_policy
        .should_retry(updated_info.attempt_count())
    {
        DeliveryStatus::Failed(error.to_string())
    } else {
        DeliveryStatus::Retry {
            attempts: updated_info.attempt_count(),
            last_error: error.to_string(),
        }
    };

    processor
        .queue
        .update_status(message_id, new_status.clone());

    // A terminal outcome triggers an RFC 3464 delivery status notification
    // back to the original sender, unless the original message had a null
    // envelope sender (a DSN replying to a DSN would loop forever).
    if matches!(
        new_status,
        DeliveryStatus::Bounced(_) | DeliveryStatus::Failed(_)
    ) && processor.dsn.enabled
        && let Some(spool) = &processor.spool
    {
        let mut terminal_info = updated_info.clone();
        terminal_info.status = new_status.clone();
        maybe_spool_dsn(processor, context, &terminal_info, &error, spool).await;
    }

    // Calculate and set next retry time using exponential backoff
    if matches!(new_status, DeliveryStatus::Retry { .. }) {
        let next_retry_at = processor
            .retry_policy
            .calculate_next_retry(updated_info.attempt_count());

        processor
            .queue
            .set_next_retry_at(message_id, next_retry_at);

        // Calculate delay for logging
        let current_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let delay_secs = next_retry_at.saturating_sub(current_time);

        info!(
            message_id = ?message_id,
            attempt = updated_info.attempt_count(),
            retry_delay_secs = delay_secs,
            next_retry_at = next_retry_at,
            "Scheduled retry with exponential backoff"
        );
    }

    // Persist the updated status (Retry or Failed) to spool
    if let Some(spool) = &processor.spool
        && let Err(e) = persist_delivery_state(processor, message_id, spool).await
    {
        warn!(
            message_id = ?message_id,
            error = %e,
            "Failed to persist delivery state after handling delivery error"
        );
    }

    context.delivery = Some(delivery_context_for(
        message_id,
        &updated_info,
        Some(server),
        Some(error.to_string()),
    ));

    error
}

/// Persist the current delivery queue state to the spool's Context.delivery field
///
/// This method synchronizes the in-memory queue state (status, attempts, retry timing)
/// to the spool's persistent storage. This ensures queue state survives restarts.
///
/// # Errors
/// Returns an error if the message is not in the queue or if spool update fails
pub async fn persist_delivery_state(
    processor: &DeliveryProcessor,
    message_id: &SpooledMessageId,
    spool: &Arc<dyn sendcore_store::BackingStore>,
) -> Result<(), DeliveryError> {
    // Get current queue info
    let info = processor.queue.get(message_id).ok_or_else(|| {
        SystemError::MessageNotFound(format!("Message {message_id:?} not in queue"))
    })?;

    // Read context from spool
    let mut context = spool
        .read(message_id)
        .await
        .map_err(|e| SystemError::SpoolRead(e.to_string()))?;

    // Update the delivery field with current queue state
    let error = match &info.status {
        DeliveryStatus::Failed(e) | DeliveryStatus::Retry { last_error: e, .. } => Some(e.clone()),
        _ => None,
    };
    context.delivery = Some(delivery_context_for(
        message_id,
        &info,
        info.current_mail_server().map(MailServer::address),
        error,
    ));

    // Atomically update spool
    spool
        .update(message_id, &context)
        .await
        .map_err(|e| SystemError::SpoolWrite(e.to_string()))?;

    Ok(())
}

/// Deliver a message via SMTP (complete transaction including DATA)
///
/// This method performs the full SMTP transaction by delegating to `SmtpTransaction`.
///
/// # Errors
/// Returns an error if any part of the SMTP transaction fails
async fn deliver_message(
    processor: &DeliveryProcessor,
    server_address: &str,
    context: &Context,
    delivery_info: &DeliveryInfo,
) -> Result<(), DeliveryError> {
    // Check if TLS is required for this domain
    let require_tls = processor
        .domains
        .get(&delivery_info.recipient_domain)
        .is_some_and(|config| config.require_tls);

    // Determine if we should accept invalid certificates
    // Priority: per-domain override > global configuration
    let accept_invalid_certs = processor
        .domains
        .get(&delivery_info.recipient_domain)
        .and_then(|config| config.accept_invalid_certs)
        .unwrap_or(processor.accept_invalid_certs);

    // A configured smart-host may require AUTH PLAIN/LOGIN; never sent when
    // delivering direct to a recipient's own MX.
    let smart_host_auth = processor
        .smart_host
        .as_ref()
        .filter(|sh| sh.host_port().0 == server_address.rsplit_once(':').map_or(server_address, |(h, _)| h))
        .and_then(|sh| {
            sh.credentials()
                .map(|(u, p)| (u.to_string(), p.to_string(), sh.auth_mechanism))
        });

    // Create and execute the SMTP transaction
    let transaction = crate::smtp_transaction::SmtpTransaction::new(
        context,
        server_address.to_string(),
        require_tls,
        accept_invalid_certs,
        &processor.smtp_timeouts,
    )
    .with_auth(smart_host_auth);

    transaction.execute().await
}

fn current_unix_time() -> i64 {
    #[allow(clippy::cast_possible_wrap)]
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    secs
}

/// Re-checks the owning tenant and the recipient domain's reputation
/// immediately before the attempt, since either may have changed since
/// admission. A missing tenant or reputation service is treated as "not
/// configured" rather than a failure; both are optional injected services
/// so tests can omit them.
async fn recheck_tenant_and_reputation(
    processor: &DeliveryProcessor,
    info: &DeliveryInfo,
) -> Result<(), DeliveryError> {
    if let Some(tenants) = processor.tenants.as_ref()
        && let Some(tenant_id) = info.tenant_id.as_ref()
    {
        let now = current_unix_time();
        let active = tenants.get(tenant_id, now).is_some_and(|s| s.config.active);
        if !active {
            return Err(PermanentError::TenantInactive(tenant_id.to_string()).into());
        }
    }

    if let Some(reputation) = processor.reputation.as_ref()
        && let sendcore_policy::DeliveryAllowed::Deny { recommendation } =
            reputation.check_delivery_allowed(&info.recipient_domain)
    {
        return Err(PermanentError::ReputationBlocked(recommendation.to_string()).into());
    }

    Ok(())
}

/// Splits a raw RFC 5322 message into its header block and body, tolerating
/// both CRLF and bare-LF line endings.
fn split_headers_and_body(data: &[u8]) -> (String, String) {
    let text = String::from_utf8_lossy(data).into_owned();
    if let Some(idx) = text.find("\r\n\r\n") {
        (text[..idx].to_string(), text[idx + 4..].to_string())
    } else if let Some(idx) = text.find("\n\n") {
        (text[..idx].to_string(), text[idx + 2..].to_string())
    } else {
        (text, String::new())
    }
}

/// Parses an unfolded header block into `(name, value)` pairs, joining
/// folded continuation lines (leading whitespace) onto the prior header.
fn parse_header_lines(header_block: &str) -> Vec<(String, String)> {
    let mut headers = Vec::new();
    let mut current: Option<(String, String)> = None;

    for line in header_block.lines() {
        if (line.starts_with(' ') || line.starts_with('\t'))
            && let Some((_, value)) = current.as_mut()
        {
            value.push(' ');
            value.push_str(line.trim());
            continue;
        }
        if let Some(pair) = current.take() {
            headers.push(pair);
        }
        if let Some((name, value)) = line.split_once(':') {
            current = Some((name.trim().to_string(), value.trim().to_string()));
        }
    }
    if let Some(pair) = current.take() {
        headers.push(pair);
    }

    headers
}

/// Finds a recipient address from the envelope whose domain matches
/// `domain`, used to recover the single recipient a bounce/suppression
/// event applies to (spool entries are grouped per-domain, not per-recipient).
fn recipient_for_domain(context: &Context, domain: &str) -> Option<String> {
    let recipients = context.envelope.recipients()?;
    recipients.iter().find_map(|addr| {
        let email = crate::smtp_transaction::extract_email_address(addr)?;
        let recipient_domain = email.rsplit_once('@').map(|(_, d)| d)?;
        recipient_domain.eq_ignore_ascii_case(domain).then(|| email.to_string())
    })
}

/// Fetches/generates the DKIM key for the envelope-from domain and inserts
/// the resulting `DKIM-Signature` header ahead of the existing header
/// block. A domain with no verified sender record produces a terminal
/// failure, not a retry, and never a silent unsigned send.
async fn sign_with_dkim(
    processor: &DeliveryProcessor,
    context: &mut Context,
) -> Result<(), DeliveryError> {
    let Some(dkim) = processor.dkim.as_ref() else {
        return Ok(());
    };
    let Some(data) = context.data.clone() else {
        return Ok(());
    };

    let Some(sender) = context
        .envelope
        .sender()
        .and_then(crate::smtp_transaction::extract_email_address)
    else {
        return Ok(());
    };
    let Some((_, sender_domain)) = sender.rsplit_once('@') else {
        return Ok(());
    };
    let domain = sendcore_common::Domain::new(sender_domain.to_string());

    let (header_block, body) = split_headers_and_body(&data);
    let headers = parse_header_lines(&header_block);

    match dkim.sign(&domain, &headers, &body).await {
        Ok(signature) => {
            let signed = format!("DKIM-Signature: {signature}\r\n{header_block}\r\n\r\n{body}");
            context.data = Some(Arc::from(signed.into_bytes()));
            Ok(())
        }
        Err(sendcore_dkim::DkimError::DomainNotVerified(domain)) => {
            Err(PermanentError::DomainNotVerified(domain.to_string()).into())
        }
        Err(e) => Err(SystemError::Internal(format!("DKIM signing failed: {e}")).into()),
    }
}

/// Generates and spools an RFC 3464 delivery status notification back to the
/// original sender of a message that has just reached a terminal outcome.
/// Declines (via [`crate::dsn::should_generate_dsn`]) for null-sender
/// messages, already-retrying jobs, and system errors.
async fn maybe_spool_dsn(
    processor: &DeliveryProcessor,
    original_context: &Context,
    terminal_info: &DeliveryInfo,
    error: &DeliveryError,
    spool: &Arc<dyn sendcore_store::BackingStore>,
) {
    if !crate::dsn::should_generate_dsn(original_context, terminal_info, error) {
        return;
    }

    match crate::dsn::generate_dsn(original_context, terminal_info, error, &processor.dsn) {
        Ok(mut dsn_context) => {
            if let Err(e) = spool.write(&mut dsn_context).await {
                warn!(
                    message_id = ?terminal_info.message_id,
                    error = %e,
                    "Failed to spool delivery status notification"
                );
            } else {
                info!(
                    message_id = ?terminal_info.message_id,
                    "Spooled delivery status notification for failed delivery"
                );
            }
        }
        Err(e) => {
            warn!(
                message_id = ?terminal_info.message_id,
                error = %e,
                "Failed to generate delivery status notification"
            );
        }
    }
}
