//! Delivery queue management

pub mod cleanup;
pub mod retry;

use std::sync::Arc;

use dashmap::DashMap;
use sendcore_common::DeliveryStatus;
use sendcore_store::SpooledMessageId;

use crate::{dns::MailServer, types::DeliveryInfo};

fn current_unix_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Manages the delivery queue for outbound messages
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    /// Map of message IDs to delivery information
    queue: Arc<DashMap<SpooledMessageId, DeliveryInfo>>,
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryQueue {
    /// Create a new empty delivery queue
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: Arc::new(DashMap::new()),
        }
    }

    /// Add a message to the delivery queue
    pub fn enqueue(&self, message_id: SpooledMessageId, recipient_domain: String) {
        self.queue.insert(
            message_id.clone(),
            DeliveryInfo::new(message_id, recipient_domain),
        );
    }

    /// Add a message to the delivery queue, carrying the tenant and priority
    /// it was admitted with, for fair-share scheduling.
    pub fn enqueue_for_tenant(
        &self,
        message_id: SpooledMessageId,
        recipient_domain: String,
        tenant_id: Option<Arc<str>>,
        priority: i32,
    ) {
        self.queue.insert(
            message_id.clone(),
            DeliveryInfo::new_for_tenant(message_id, recipient_domain, tenant_id, priority),
        );
    }

    /// Insert a fully-formed delivery info, overwriting any existing entry
    ///
    /// Used when restoring delivery state persisted in the spool (e.g. after
    /// a restart) rather than starting a fresh `DeliveryInfo`.
    pub fn insert(&self, message_id: SpooledMessageId, info: DeliveryInfo) {
        self.queue.insert(message_id, info);
    }

    /// Get delivery info for a message
    #[must_use]
    pub fn get(&self, message_id: &SpooledMessageId) -> Option<DeliveryInfo> {
        self.queue.get(message_id).map(|entry| entry.clone())
    }

    /// Number of messages currently tracked by the queue
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Update the status of a message. Tracks (or clears) `in_progress_since`
    /// so the periodic inflight-leak sweep can tell how long a job has been
    /// stuck `InProgress`.
    pub fn update_status(&self, message_id: &SpooledMessageId, status: DeliveryStatus) {
        if let Some(mut info) = self.queue.get_mut(message_id) {
            info.in_progress_since = match status {
                DeliveryStatus::InProgress => Some(current_unix_time()),
                _ => None,
            };
            info.status = status;
        }
    }

    /// Reclaims every message that has been `InProgress` for longer than
    /// `threshold_secs`, flipping it back to `Pending` so the next process
    /// tick picks it up again. Unlike the cold-restart fold-back in
    /// `scan::scan_spool_internal`, this runs while the process is live and
    /// does not depend on queue membership — it is the only thing that
    /// reclaims a job whose worker task died or hung without the process
    /// itself restarting.
    ///
    /// Returns the ids reclaimed so the caller can persist the status change
    /// back to the spool.
    #[must_use]
    pub fn sweep_inflight_leaks(&self, now: u64, threshold_secs: u64) -> Vec<SpooledMessageId> {
        let mut reclaimed = Vec::new();
        for mut entry in self.queue.iter_mut() {
            if entry.status != DeliveryStatus::InProgress {
                continue;
            }
            let Some(since) = entry.in_progress_since else {
                continue;
            };
            if now.saturating_sub(since) >= threshold_secs {
                entry.status = DeliveryStatus::Pending;
                entry.in_progress_since = None;
                reclaimed.push(entry.message_id.clone());
            }
        }
        reclaimed
    }

    /// Record a delivery attempt
    pub fn record_attempt(&self, message_id: &SpooledMessageId, attempt: sendcore_common::DeliveryAttempt) {
        if let Some(mut info) = self.queue.get_mut(message_id) {
            info.record_attempt(attempt);
        }
    }

    /// Set the resolved mail servers for a message
    pub fn set_mail_servers(&self, message_id: &SpooledMessageId, servers: Arc<Vec<MailServer>>) {
        if let Some(mut info) = self.queue.get_mut(message_id) {
            info.mail_servers = servers;
            info.current_server_index = 0;
        }
    }

    /// Try the next MX server for a message.
    ///
    /// Returns `true` if there is another server to try, `false` if all exhausted.
    pub fn try_next_server(&self, message_id: &SpooledMessageId) -> bool {
        self.queue
            .get_mut(message_id)
            .is_some_and(|mut info| info.try_next_server())
    }

    /// Remove a message from the queue
    pub fn remove(&self, message_id: &SpooledMessageId) -> Option<DeliveryInfo> {
        self.queue.remove(message_id).map(|(_, info)| info)
    }

    /// Set the next retry timestamp for a message
    pub fn set_next_retry_at(&self, message_id: &SpooledMessageId, next_retry_at: u64) {
        if let Some(mut info) = self.queue.get_mut(message_id) {
            info.next_retry_at = Some(next_retry_at);
        }
    }

    /// Reset the server index to 0 for a message (for new retry cycle)
    pub fn reset_server_index(&self, message_id: &SpooledMessageId) {
        if let Some(mut info) = self.queue.get_mut(message_id) {
            info.reset_server_index();
        }
    }

    /// Get all pending messages
    #[must_use]
    pub fn pending_messages(&self) -> Vec<DeliveryInfo> {
        self.queue
            .iter()
            .filter(|entry| entry.status == DeliveryStatus::Pending)
            .map(|entry| entry.clone())
            .collect()
    }

    /// Get all messages with their current status
    #[must_use]
    pub fn all_messages(&self) -> Vec<DeliveryInfo> {
        self.queue.iter().map(|entry| entry.clone()).collect()
    }

    /// External `Cancel(tenant_id, job_id)` entry point (P7).
    ///
    /// Returns `false` without side effects if the job does not exist, is
    /// owned by a different tenant (no cross-tenant cancellation, mirroring
    /// the no-leakage guarantee the fair-share scheduler gives on the read
    /// side), or has already reached a terminal status.
    ///
    /// A `Pending`/`Retry`'d job transitions immediately, exactly once, to
    /// `Failed("cancelled")`. A job currently `InProgress` is never aborted
    /// mid-attempt; instead `cancel_requested` is set so the worker handling
    /// it forces the same terminal outcome once the in-flight attempt
    /// finishes (see `processor::delivery`).
    pub fn request_cancel(&self, tenant_id: &str, message_id: &SpooledMessageId) -> bool {
        let Some(mut info) = self.queue.get_mut(message_id) else {
            return false;
        };
        if info.tenant_id.as_deref() != Some(tenant_id) {
            return false;
        }
        if info.status.is_terminal() {
            return false;
        }
        if info.status == DeliveryStatus::InProgress {
            info.cancel_requested = true;
            return true;
        }
        info.status = DeliveryStatus::Failed("cancelled".to_string());
        info.cancel_requested = true;
        true
    }
}

#[cfg(test)]
mod cancel_tests {
    use super::*;

    fn queue_with(tenant: &str, status: DeliveryStatus) -> (DeliveryQueue, SpooledMessageId) {
        let queue = DeliveryQueue::new();
        let id = SpooledMessageId::generate();
        queue.enqueue_for_tenant(id.clone(), "example.com".to_string(), Some(Arc::from(tenant)), 50);
        queue.update_status(&id, status);
        (queue, id)
    }

    #[test]
    fn cancel_pending_job_transitions_to_failed_cancelled() {
        let (queue, id) = queue_with("t1", DeliveryStatus::Pending);
        assert!(queue.request_cancel("t1", &id));
        assert_eq!(
            queue.get(&id).unwrap().status,
            DeliveryStatus::Failed("cancelled".to_string())
        );
    }

    #[test]
    fn cancel_is_idempotent_on_terminal_job() {
        let (queue, id) = queue_with("t1", DeliveryStatus::Completed);
        assert!(!queue.request_cancel("t1", &id));
        assert_eq!(queue.get(&id).unwrap().status, DeliveryStatus::Completed);
    }

    #[test]
    fn cancel_rejects_wrong_tenant() {
        let (queue, id) = queue_with("t1", DeliveryStatus::Pending);
        assert!(!queue.request_cancel("t2", &id));
        assert_eq!(queue.get(&id).unwrap().status, DeliveryStatus::Pending);
    }

    #[test]
    fn cancel_in_progress_job_sets_flag_without_changing_status_yet() {
        let (queue, id) = queue_with("t1", DeliveryStatus::InProgress);
        assert!(queue.request_cancel("t1", &id));
        let info = queue.get(&id).unwrap();
        assert_eq!(info.status, DeliveryStatus::InProgress);
        assert!(info.cancel_requested);
    }

    #[test]
    fn cancel_unknown_job_returns_false() {
        let queue = DeliveryQueue::new();
        let id = SpooledMessageId::generate();
        assert!(!queue.request_cancel("t1", &id));
    }
}

#[cfg(test)]
mod inflight_sweep_tests {
    use super::*;

    #[test]
    fn stuck_in_progress_job_is_reclaimed_past_threshold() {
        let queue = DeliveryQueue::new();
        let id = SpooledMessageId::generate();
        queue.enqueue(id.clone(), "example.com".to_string());
        queue.update_status(&id, DeliveryStatus::InProgress);

        let since = queue.get(&id).unwrap().in_progress_since.unwrap();

        // Not yet past the threshold.
        assert!(queue.sweep_inflight_leaks(since + 10, 600).is_empty());
        assert_eq!(queue.get(&id).unwrap().status, DeliveryStatus::InProgress);

        // Past the threshold: reclaimed back to Pending.
        let reclaimed = queue.sweep_inflight_leaks(since + 600, 600);
        assert_eq!(reclaimed, vec![id.clone()]);
        let info = queue.get(&id).unwrap();
        assert_eq!(info.status, DeliveryStatus::Pending);
        assert!(info.in_progress_since.is_none());
    }

    #[test]
    fn pending_and_completed_jobs_are_never_swept() {
        let queue = DeliveryQueue::new();
        let pending = SpooledMessageId::generate();
        queue.enqueue(pending.clone(), "example.com".to_string());

        let completed = SpooledMessageId::generate();
        queue.enqueue(completed.clone(), "example.com".to_string());
        queue.update_status(&completed, DeliveryStatus::InProgress);
        queue.update_status(&completed, DeliveryStatus::Completed);

        assert!(queue.sweep_inflight_leaks(u64::MAX, 0).is_empty());
    }
}
