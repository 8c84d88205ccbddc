//! The per-message context carried from the moment a message is accepted
//! through spooling, scheduling, and delivery.

use std::sync::Arc;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;

/// Everything known about a single message as it moves through the system.
///
/// A `Context` is created when a message is accepted over SMTP (or submitted
/// via another ingress), handed to the spool for durable storage, and later
/// read back by the scheduler to drive delivery. `delivery` is `None` until
/// the scheduler has taken ownership of the message.
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    /// Identifier of the session that accepted this message (HELO/EHLO
    /// identity, or a synthetic id for internally generated messages such
    /// as DSNs).
    pub id: String,

    /// Sender and recipients for this message.
    pub envelope: Envelope,

    /// The raw message bytes (headers + body), if loaded.
    pub data: Option<Arc<[u8]>>,

    /// Whether this session negotiated ESMTP extensions (8BITMIME, SIZE, ...).
    pub extended: bool,

    /// Free-form metadata attached by modules (tenant id, campaign tags, ...).
    pub metadata: AHashMap<String, String>,

    /// Id assigned by the backing store once the message is spooled.
    pub tracking_id: Option<String>,

    /// Delivery state, present once the scheduler has picked this message up.
    pub delivery: Option<DeliveryContext>,
}

/// Current state of a message's delivery lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Waiting to be picked up by a delivery worker.
    Pending,
    /// Currently being delivered.
    InProgress,
    /// Delivered successfully and removed from the spool.
    Completed,
    /// Permanently failed; a DSN may be generated.
    Failed(String),
    /// Rejected by the remote server as a bounce (hard or block-listed);
    /// terminal, never subject to retry.
    Bounced(String),
    /// Exceeded the message expiration window before it could be delivered.
    Expired,
    /// Temporarily failed and scheduled for another attempt.
    Retry {
        attempts: u32,
        last_error: String,
    },
}

impl DeliveryStatus {
    /// `true` for states that will never transition again: `Completed`,
    /// `Failed`, `Bounced`, and `Expired`. `Pending`, `InProgress`, and
    /// `Retry` are all non-terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed(_) | Self::Bounced(_) | Self::Expired
        )
    }
}

/// A single delivery attempt against one mail server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// Unix timestamp (seconds) when the attempt was made.
    pub timestamp: u64,
    /// Error returned by the remote server, if any.
    pub error: Option<String>,
    /// Address of the mail server the attempt was made against.
    pub server: String,
}

/// Delivery state for a message, persisted alongside its envelope and data
/// so the scheduler's in-memory queue can be rebuilt after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryContext {
    /// Spooled message id, stored as a string for persistence stability.
    pub message_id: String,
    /// Recipient domain this delivery context tracks.
    pub domain: Arc<str>,
    /// Mail server currently (or most recently) being used.
    pub server: Option<String>,
    /// Most recent delivery error, if any.
    pub error: Option<String>,
    /// Number of attempts made so far.
    pub attempts: Option<u32>,
    /// Current delivery status.
    pub status: DeliveryStatus,
    /// Full history of delivery attempts.
    pub attempt_history: Vec<DeliveryAttempt>,
    /// Unix timestamp (seconds) when the message was first queued.
    pub queued_at: u64,
    /// Unix timestamp (seconds) of the next scheduled retry, if any.
    pub next_retry_at: Option<u64>,
    /// Index into the resolved MX server list currently being tried.
    pub current_server_index: usize,
    /// Owning tenant, for fair-share scheduling and reputation accounting.
    #[serde(default)]
    pub tenant_id: Option<String>,
    /// Delivery priority assigned at admission (0-100, higher goes first).
    #[serde(default)]
    pub priority: i32,
    /// Bounce classification (`hard`, `soft`, `block`) once a bounce response
    /// has been classified.
    #[serde(default)]
    pub bounce_classification: Option<String>,
    /// Unix timestamp (seconds) of successful delivery, if completed.
    #[serde(default)]
    pub delivered_at: Option<u64>,
    /// Wall-clock time of the successful attempt, in milliseconds.
    #[serde(default)]
    pub delivery_time_ms: Option<u64>,
}

#[cfg(test)]
mod test {
    use super::{Context, DeliveryAttempt, DeliveryContext, DeliveryStatus};

    #[test]
    fn context_default_has_no_delivery_state() {
        let context = Context::default();
        assert!(context.delivery.is_none());
        assert!(context.data.is_none());
        assert!(!context.extended);
    }

    #[test]
    fn delivery_status_equality_ignores_nothing() {
        assert_eq!(DeliveryStatus::Pending, DeliveryStatus::Pending);
        assert_ne!(
            DeliveryStatus::Failed("a".to_string()),
            DeliveryStatus::Failed("b".to_string())
        );
        assert_eq!(
            DeliveryStatus::Retry {
                attempts: 1,
                last_error: "x".to_string()
            },
            DeliveryStatus::Retry {
                attempts: 1,
                last_error: "x".to_string()
            }
        );
    }

    #[test]
    fn delivery_context_round_trips_through_bincode() {
        let delivery = DeliveryContext {
            message_id: "01H000000000000000000000".to_string(),
            domain: std::sync::Arc::from("example.com"),
            server: Some("mx1.example.com:25".to_string()),
            error: None,
            attempts: Some(1),
            status: DeliveryStatus::Retry {
                attempts: 1,
                last_error: "connection refused".to_string(),
            },
            attempt_history: vec![DeliveryAttempt {
                timestamp: 1_700_000_000,
                error: Some("connection refused".to_string()),
                server: "mx1.example.com:25".to_string(),
            }],
            queued_at: 1_700_000_000,
            next_retry_at: Some(1_700_000_300),
            current_server_index: 0,
            tenant_id: Some("tenant-1".to_string()),
            priority: 60,
            bounce_classification: None,
            delivered_at: None,
            delivery_time_ms: None,
        };

        let mut context = Context::default();
        context.delivery = Some(delivery);

        let encoded = bincode::serde::encode_to_vec(&context, bincode::config::standard())
            .expect("encode");
        let (decoded, _): (Context, usize) =
            bincode::serde::decode_from_slice(&encoded, bincode::config::standard())
                .expect("decode");

        assert_eq!(
            decoded.delivery.unwrap().attempt_history.len(),
            context.delivery.unwrap().attempt_history.len()
        );
    }
}
