//! Tenant context and admission pipeline.

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod admission;
pub mod error;
pub mod service;
pub mod tenant;

pub use admission::{AdmissionRequest, AdmissionResult, admit, admit_with_rollout};
pub use error::{AdmissionError, RateTier};
pub use service::AdmissionService;
pub use tenant::{Plan, SendCaps, TenantConfig, TenantRegistry, TenantSnapshot};
