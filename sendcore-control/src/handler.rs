//! Production [`CommandHandler`], wiring the control protocol's commands
//! onto the scheduler's [`DeliveryQueryService`], the tenant registry, and
//! the reputation engine.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use sendcore_common::DeliveryStatus;
use sendcore_policy::ReputationEngine;
use sendcore_scheduler::DeliveryQueryService;
use sendcore_tenant::TenantRegistry;

use crate::{
    protocol::{
        CachedMailServer, DnsCommand, DomainReputationInfo, QueueCommand, QueueMessage,
        QueueMessageDetails, QueueStats, ReputationCommand, Request, RequestCommand, Response,
        ResponseData, SystemCommand, SystemStatus, TenantCommand, TenantInfo,
    },
    server::CommandHandler,
    Result,
};

fn status_label(status: &DeliveryStatus) -> String {
    match status {
        DeliveryStatus::Pending => "pending".to_string(),
        DeliveryStatus::InProgress => "processing".to_string(),
        DeliveryStatus::Completed => "delivered".to_string(),
        DeliveryStatus::Failed(reason) => format!("failed: {reason}"),
        DeliveryStatus::Bounced(reason) => format!("bounced: {reason}"),
        DeliveryStatus::Expired => "expired".to_string(),
        DeliveryStatus::Retry { attempts, last_error } => {
            format!("retry (attempt {attempts}): {last_error}")
        }
    }
}

fn matches_filter(status: &DeliveryStatus, filter: Option<&str>) -> bool {
    let Some(filter) = filter else { return true };
    status_label(status).starts_with(filter)
}

/// Handles control-socket requests against a running scheduler, tenant
/// registry, and reputation engine. Constructed once at process startup and
/// shared with [`crate::ControlServer`].
pub struct SendcoreCommandHandler {
    started_at: std::time::Instant,
    delivery: Arc<dyn DeliveryQueryService>,
    tenants: Arc<TenantRegistry>,
    reputation: Arc<ReputationEngine>,
}

impl SendcoreCommandHandler {
    #[must_use]
    pub fn new(
        delivery: Arc<dyn DeliveryQueryService>,
        tenants: Arc<TenantRegistry>,
        reputation: Arc<ReputationEngine>,
    ) -> Self {
        Self {
            started_at: std::time::Instant::now(),
            delivery,
            tenants,
            reputation,
        }
    }

    fn now_secs() -> i64 {
        chrono::Utc::now().timestamp()
    }

    async fn read_envelope(&self, id: &sendcore_store::SpooledMessageId) -> (String, Vec<String>, usize) {
        let Some(spool) = self.delivery.spool() else {
            return (String::new(), Vec::new(), 0);
        };
        match spool.read(id).await {
            Ok(context) => {
                let from = context
                    .envelope
                    .sender()
                    .map_or_else(String::new, std::string::ToString::to_string);
                let to = context
                    .envelope
                    .recipients()
                    .map(|r| r.0.iter().map(std::string::ToString::to_string).collect())
                    .unwrap_or_default();
                let size = context.data.as_ref().map_or(0, |d| d.len());
                (from, to, size)
            }
            Err(_) => (String::new(), Vec::new(), 0),
        }
    }
}

#[async_trait]
impl CommandHandler for SendcoreCommandHandler {
    async fn handle_request(&self, request: Request) -> Result<Response> {
        match request.command {
            RequestCommand::Dns(cmd) => self.handle_dns(cmd).await,
            RequestCommand::System(cmd) => self.handle_system(cmd).await,
            RequestCommand::Queue(cmd) => self.handle_queue(cmd).await,
            RequestCommand::Tenant(cmd) => self.handle_tenant(cmd),
            RequestCommand::Reputation(cmd) => self.handle_reputation(cmd).await,
        }
    }
}

impl SendcoreCommandHandler {
    async fn handle_dns(&self, cmd: DnsCommand) -> Result<Response> {
        let Some(resolver) = self.delivery.dns_resolver().clone() else {
            return Ok(Response::error("DNS resolver not initialized".to_string()));
        };

        match cmd {
            DnsCommand::ListCache => {
                let mut cache: HashMap<String, Vec<CachedMailServer>> = HashMap::new();
                for (domain, servers, ttl_remaining_secs) in resolver.cache_entries().await {
                    let servers = servers
                        .into_iter()
                        .map(|server| CachedMailServer {
                            host: server.host,
                            priority: server.priority,
                            port: server.port,
                            ttl_remaining_secs,
                        })
                        .collect();
                    cache.insert(domain, servers);
                }
                Ok(Response::data(ResponseData::DnsCache(cache)))
            }
            DnsCommand::ClearCache => {
                resolver.clear_cache().await;
                Ok(Response::ok())
            }
            DnsCommand::RefreshDomain(domain) => match resolver.resolve_mail_servers(&domain).await {
                Ok(servers) => Ok(Response::data(ResponseData::Message(format!(
                    "refreshed DNS for {domain}: {} mail server(s)",
                    servers.len()
                )))),
                Err(e) => Ok(Response::error(format!(
                    "failed to refresh domain {domain}: {e}"
                ))),
            },
            DnsCommand::SetOverride { domain, mx_server } => {
                self.delivery.domains().set_mx_override(domain.clone(), mx_server.clone());
                Ok(Response::data(ResponseData::Message(format!(
                    "set MX override for {domain} -> {mx_server}"
                ))))
            }
            DnsCommand::RemoveOverride(domain) => {
                self.delivery.domains().clear_mx_override(&domain);
                Ok(Response::data(ResponseData::Message(format!(
                    "removed MX override for {domain}"
                ))))
            }
            DnsCommand::ListOverrides => {
                let overrides = self.delivery.domains().mx_overrides().into_iter().collect();
                Ok(Response::data(ResponseData::MxOverrides(overrides)))
            }
        }
    }

    async fn handle_system(&self, cmd: SystemCommand) -> Result<Response> {
        match cmd {
            SystemCommand::Ping => Ok(Response::ok()),
            SystemCommand::Status => {
                let dns_cache_entries = match self.delivery.dns_resolver() {
                    Some(resolver) => resolver.cache_entries().await.len(),
                    None => 0,
                };
                Ok(Response::data(ResponseData::SystemStatus(SystemStatus {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    uptime_secs: self.started_at.elapsed().as_secs(),
                    queue_size: self.delivery.queue_len(),
                    dns_cache_entries,
                })))
            }
        }
    }

    async fn handle_queue(&self, cmd: QueueCommand) -> Result<Response> {
        match cmd {
            QueueCommand::List { status_filter } => {
                let messages = self.delivery.list_messages(None);
                let mut out = Vec::with_capacity(messages.len());
                for info in messages.iter().filter(|i| matches_filter(&i.status, status_filter.as_deref())) {
                    let (from, to, size) = self.read_envelope(&info.message_id).await;
                    out.push(QueueMessage {
                        id: info.message_id.to_string(),
                        from,
                        to,
                        domain: info.recipient_domain.to_string(),
                        status: status_label(&info.status),
                        attempts: info.attempt_count(),
                        next_retry: info.next_retry_at,
                        size,
                        spooled_at: info.queued_at,
                    });
                }
                Ok(Response::data(ResponseData::QueueList(out)))
            }
            QueueCommand::View { message_id } => {
                let id = sendcore_store::SpooledMessageId::from_filename(&format!("{message_id}.bin"))
                    .ok_or_else(|| crate::ControlError::InvalidRequest("bad message id".to_string()))?;
                let Some(info) = self.delivery.get_message(&id) else {
                    return Ok(Response::error("message not found".to_string()));
                };
                let last_error = info.attempts.last().and_then(|a| a.error.clone());
                let (from, to, size) = self.read_envelope(&id).await;
                let (headers, body_preview) = match self.delivery.spool() {
                    Some(spool) => match spool.read(&id).await {
                        Ok(context) => {
                            let body = context
                                .data
                                .as_deref()
                                .map(|d| String::from_utf8_lossy(d).into_owned())
                                .unwrap_or_default();
                            let preview: String = body.chars().take(1024).collect();
                            (HashMap::new(), preview)
                        }
                        Err(_) => (HashMap::new(), String::new()),
                    },
                    None => (HashMap::new(), String::new()),
                };
                Ok(Response::data(ResponseData::QueueMessageDetails(QueueMessageDetails {
                    id: message_id,
                    from,
                    to,
                    domain: info.recipient_domain.to_string(),
                    status: status_label(&info.status),
                    attempts: info.attempt_count(),
                    next_retry: info.next_retry_at,
                    last_error,
                    size,
                    spooled_at: info.queued_at,
                    headers,
                    body_preview,
                })))
            }
            QueueCommand::Retry { message_id, force } => {
                let id = sendcore_store::SpooledMessageId::from_filename(&format!("{message_id}.bin"))
                    .ok_or_else(|| crate::ControlError::InvalidRequest("bad message id".to_string()))?;
                let Some(info) = self.delivery.get_message(&id) else {
                    return Ok(Response::error("message not found".to_string()));
                };
                let retryable = force
                    || matches!(
                        info.status,
                        DeliveryStatus::Failed(_) | DeliveryStatus::Retry { .. }
                    );
                if !retryable {
                    return Ok(Response::error(
                        "message is not in a retryable state (pass force to override)".to_string(),
                    ));
                }
                self.delivery.update_status(&id, DeliveryStatus::Pending);
                self.delivery.reset_server_index(&id);
                self.delivery.set_next_retry_at(&id, 0);
                Ok(Response::data(ResponseData::Message(format!(
                    "message {message_id} scheduled for immediate retry"
                ))))
            }
            QueueCommand::Delete { message_id } => {
                let id = sendcore_store::SpooledMessageId::from_filename(&format!("{message_id}.bin"))
                    .ok_or_else(|| crate::ControlError::InvalidRequest("bad message id".to_string()))?;
                match self.delivery.remove(&id) {
                    Some(_) => Ok(Response::data(ResponseData::Message(format!(
                        "message {message_id} removed from queue"
                    )))),
                    None => Ok(Response::error("message not found".to_string())),
                }
            }
            QueueCommand::Cancel { tenant_id, message_id } => {
                let id = sendcore_store::SpooledMessageId::from_filename(&format!("{message_id}.bin"))
                    .ok_or_else(|| crate::ControlError::InvalidRequest("bad message id".to_string()))?;
                if self.delivery.cancel(&tenant_id, &id) {
                    Ok(Response::data(ResponseData::Message(format!(
                        "message {message_id} cancelled"
                    ))))
                } else {
                    Ok(Response::error(
                        "message not found, owned by a different tenant, or already terminal"
                            .to_string(),
                    ))
                }
            }
            QueueCommand::Stats => {
                let messages = self.delivery.list_messages(None);
                let mut by_status = HashMap::new();
                let mut by_domain = HashMap::new();
                let mut oldest = None;
                let now = u64::try_from(Self::now_secs()).unwrap_or(0);
                for info in &messages {
                    *by_status.entry(status_label(&info.status)).or_insert(0) += 1;
                    *by_domain.entry(info.recipient_domain.to_string()).or_insert(0) += 1;
                    let age = now.saturating_sub(info.queued_at);
                    oldest = Some(oldest.map_or(age, |o: u64| o.max(age)));
                }
                Ok(Response::data(ResponseData::QueueStats(QueueStats {
                    total: messages.len(),
                    by_status,
                    by_domain,
                    oldest_message_age_secs: oldest,
                })))
            }
        }
    }

    fn handle_tenant(&self, cmd: TenantCommand) -> Result<Response> {
        let now = Self::now_secs();
        match cmd {
            TenantCommand::Get(id) => match self.tenants.get(&id, now) {
                Some(snapshot) => Ok(Response::data(ResponseData::TenantInfo(TenantInfo {
                    id: snapshot.config.id,
                    active: snapshot.config.active,
                    plan: format!("{:?}", snapshot.config.plan).to_lowercase(),
                    remaining_per_minute: Some(snapshot.remaining_per_minute),
                    remaining_hourly: Some(snapshot.remaining_hourly),
                    remaining_daily: Some(snapshot.remaining_daily),
                    historical_reputation: snapshot.config.historical_reputation,
                }))),
                None => Ok(Response::error(format!("unknown tenant: {id}"))),
            },
            TenantCommand::List => {
                let list = self
                    .tenants
                    .all()
                    .into_iter()
                    .map(|config| TenantInfo {
                        id: config.id.clone(),
                        active: config.active,
                        plan: format!("{:?}", config.plan).to_lowercase(),
                        remaining_per_minute: None,
                        remaining_hourly: None,
                        remaining_daily: None,
                        historical_reputation: config.historical_reputation,
                    })
                    .collect();
                Ok(Response::data(ResponseData::TenantList(list)))
            }
        }
    }

    async fn handle_reputation(&self, cmd: ReputationCommand) -> Result<Response> {
        match cmd {
            ReputationCommand::View(domain) => match self.reputation.domain_reputation(&domain) {
                Some(rep) => Ok(Response::data(ResponseData::DomainReputation(DomainReputationInfo {
                    domain,
                    score: rep.score,
                    successful: rep.successful,
                    failed: rep.failed,
                }))),
                None => Ok(Response::error(format!("no reputation tracked for {domain}"))),
            },
            ReputationCommand::List => {
                let list = self
                    .reputation
                    .all_domains()
                    .into_iter()
                    .map(|rep| DomainReputationInfo {
                        domain: rep.domain.clone(),
                        score: rep.score,
                        successful: rep.successful,
                        failed: rep.failed,
                    })
                    .collect();
                Ok(Response::data(ResponseData::ReputationList(list)))
            }
            ReputationCommand::Reset(domain) => {
                if self
                    .reputation
                    .reset_domain(&domain)
                    .await
                    .map_err(|e| crate::ControlError::ServerError(e.to_string()))?
                {
                    Ok(Response::data(ResponseData::Message(format!(
                        "reputation reset for {domain}"
                    ))))
                } else {
                    Ok(Response::error(format!("no reputation tracked for {domain}")))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_label_formats_each_variant() {
        assert_eq!(status_label(&DeliveryStatus::Pending), "pending");
        assert_eq!(status_label(&DeliveryStatus::InProgress), "processing");
        assert_eq!(status_label(&DeliveryStatus::Completed), "delivered");
        assert_eq!(
            status_label(&DeliveryStatus::Failed("boom".to_string())),
            "failed: boom"
        );
        assert!(matches_filter(&DeliveryStatus::Pending, Some("pending")));
        assert!(!matches_filter(&DeliveryStatus::Pending, Some("delivered")));
        assert!(matches_filter(&DeliveryStatus::Pending, None));
    }
}
