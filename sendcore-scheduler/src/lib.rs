//! Durable outbound queue, scheduler, and deliverer for outbound mail from
//! the spool.
//!
//! This crate provides functionality to:
//! - Track messages pending delivery
//! - Manage delivery attempts and retries
//! - Resolve MX records, enforce per-domain rate limits and circuit breakers
//! - Prepare and send messages via SMTP, honoring per-tenant fairness

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod circuit_breaker;
pub mod dns;
pub mod domain_config;
pub mod dsn;
pub mod error;
pub mod policy;
pub mod processor;
pub mod queue;
pub mod rate_limiter;
pub mod service;
pub mod smtp_transaction;
pub mod types;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use dns::{DnsConfig, DnsError, DnsResolver, HickoryDnsResolver, MailServer};
pub use domain_config::{DomainConfig, DomainConfigRegistry, SmartHostAuthMechanism, SmartHostConfig};
pub use dsn::DsnConfig;
pub use error::{DeliveryError, PermanentError, SystemError, TemporaryError};
pub use processor::DeliveryProcessor;
pub use queue::DeliveryQueue;
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use service::DeliveryQueryService;
pub use types::{DeliveryInfo, SmtpTimeouts};
