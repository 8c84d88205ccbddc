//! `tenants` table: durable backing for `sendcore-tenant`'s `TenantRegistry`.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "tenants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub active: bool,
    /// `"basic"`, `"professional"`, or `"enterprise"`.
    pub plan: String,
    pub per_minute_cap: i32,
    pub hourly_cap: i32,
    pub daily_cap: i32,
    /// JSON array of verified sender domain strings.
    #[sea_orm(column_type = "Text")]
    pub verified_sender_domains: String,
    pub historical_reputation: f64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
