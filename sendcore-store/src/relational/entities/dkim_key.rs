//! `dkim_keys` table: durable backing for `sendcore-dkim`'s `KeyRepository`.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "dkim_keys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(indexed)]
    pub domain: String,
    pub selector: String,
    #[sea_orm(column_type = "Text")]
    pub private_key_pem: String,
    #[sea_orm(column_type = "Text")]
    pub public_key_b64: String,
    pub algorithm: String,
    pub canonicalization: String,
    /// `"1024"`, `"2048"`, or `"4096"`.
    pub key_size: String,
    pub active: bool,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
