//! Error taxonomy surfaced by the admission pipeline.

use thiserror::Error;

/// Reason a tenant operation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateTier {
    PerMinute,
    Hourly,
    Daily,
}

impl std::fmt::Display for RateTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerMinute => write!(f, "per-minute"),
            Self::Hourly => write!(f, "hourly"),
            Self::Daily => write!(f, "daily"),
        }
    }
}

/// Errors surfaced to the admission caller.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("validation failed: {0:?}")]
    ValidationError(Vec<&'static str>),

    #[error("tenant is inactive")]
    TenantInactive,

    #[error("rate limit exceeded: {tier}")]
    RateExceeded { tier: RateTier },

    #[error("sender domain {0} is not among the tenant's verified domains")]
    DomainNotAllowed(String),

    #[error("recipient is suppressed")]
    Suppressed,

    #[error("recipient domain reputation is blocked: {0}")]
    ReputationBlocked(&'static str),

    #[error("message-id already exists")]
    DuplicateMessage,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("admission halted by the auto-rollback controller")]
    RolledBack,
}
