//! `mx_reputation` table: durable backing for `sendcore-policy`'s
//! per-(mx, domain) half of `ReputationEngine`.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "mx_reputation")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(indexed)]
    pub mx_server: String,
    #[sea_orm(indexed)]
    pub domain: String,
    pub score_milli: i64,
    pub successful: i64,
    pub failed: i64,
    pub avg_response_milli_ms: i64,
    pub last_success: Option<i64>,
    pub last_failure: Option<i64>,
    /// JSON array of the most recent bounded failure-reason strings.
    #[sea_orm(column_type = "Text")]
    pub recent_failure_reasons: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
