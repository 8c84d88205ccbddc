//! Auto-rollback controller: periodic health evaluation that gates a
//! rolled-out cohort's admission.

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod controller;

pub use controller::{
    AuditEntry, HealthMetrics, RollbackConfig, RollbackController, Severity,
};
