//! Suppression list and reputation engine.

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod error;
pub mod reputation;
pub mod suppression;

pub use error::PolicyError;
pub use reputation::{
    DeliveryAllowed, DomainReputation, MxServerReputation, ReputationEngine, ReputationTier,
    tier_for_score,
};
pub use suppression::{
    BounceType, SuppressionEntry, SuppressionList, SuppressionType, classify_bounce,
};
