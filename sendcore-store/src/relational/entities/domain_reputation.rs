//! `domain_reputation` table: durable backing for `sendcore-policy`'s
//! per-domain half of `ReputationEngine`.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "domain_reputation")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub domain: String,
    /// Stored as an integer fixed-point (score * 1000) so the column stays
    /// comparable across the sqlite/postgres backends without a float PK or
    /// float equality concerns; converted back to `f64` at the boundary.
    pub score_milli: i64,
    pub successful: i64,
    pub failed: i64,
    pub last_success: Option<i64>,
    pub last_failure: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
