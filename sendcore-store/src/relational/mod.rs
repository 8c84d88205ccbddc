//! Durable relational backend (sea-orm), the source of truth behind the
//! in-process write-through caches used by `sendcore-tenant`,
//! `sendcore-policy`, and `sendcore-dkim`.
//!
//! Dual sqlite/postgres support comes for free from `sea-orm`'s
//! URL-scheme dispatch in [`RelationalStore::connect`]; migrations use the
//! portable `Table::create()` builder API rather than raw SQL so the same
//! schema applies to either backend.

pub mod entities;
pub mod error;
pub mod migrations;
mod store;

pub use error::{RelationalError, Result};
pub use migrations::Migrator;
pub use store::{
    DkimKeyRow, DomainReputationRow, MxReputationRow, RelationalStore, SuppressionRow, TenantRow,
    GLOBAL_TENANT_SENTINEL,
};
