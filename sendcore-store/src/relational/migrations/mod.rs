//! Schema migrations for the durable relational store, run automatically by
//! [`super::RelationalStore::connect`].

mod m20240301_000001_create_tenants;
mod m20240301_000002_create_dkim_keys;
mod m20240301_000003_create_domain_reputation;
mod m20240301_000004_create_mx_reputation;
mod m20240301_000005_create_suppression_entries;
mod m20240301_000006_create_message_ids;

use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_tenants::Migration),
            Box::new(m20240301_000002_create_dkim_keys::Migration),
            Box::new(m20240301_000003_create_domain_reputation::Migration),
            Box::new(m20240301_000004_create_mx_reputation::Migration),
            Box::new(m20240301_000005_create_suppression_entries::Migration),
            Box::new(m20240301_000006_create_message_ids::Migration),
        ]
    }
}
