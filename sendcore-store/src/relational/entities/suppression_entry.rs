//! `suppression_entries` table: durable backing for `sendcore-policy`'s
//! `SuppressionList`.
//!
//! `tenant_id` uses the empty string as the sentinel for "global" rather
//! than a nullable column: Postgres and SQLite both treat `NULL != NULL` in
//! a unique constraint, which would let duplicate global rows for the same
//! email slip in. An explicit non-null sentinel keeps `(tenant_id, email)`
//! uniqueness real across both backends.

use sea_orm::entity::prelude::*;

/// Sentinel `tenant_id` for a global (cross-tenant) suppression entry.
pub const GLOBAL_TENANT_SENTINEL: &str = "";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "suppression_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(indexed)]
    pub tenant_id: String,
    pub email: String,
    /// `"bounce"`, `"complaint"`, `"manual"`, or `"global"`.
    pub kind: String,
    /// `"hard"`, `"soft"`, `"block"`, or absent.
    pub bounce_type: Option<String>,
    pub reason: Option<String>,
    /// JSON object of free-form metadata.
    #[sea_orm(column_type = "Text")]
    pub metadata: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
