use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Tenants::Table)
                    .if_not_exists()
                    .col(string(Tenants::Id).primary_key())
                    .col(boolean(Tenants::Active))
                    .col(string(Tenants::Plan))
                    .col(integer(Tenants::PerMinuteCap))
                    .col(integer(Tenants::HourlyCap))
                    .col(integer(Tenants::DailyCap))
                    .col(text(Tenants::VerifiedSenderDomains))
                    .col(double(Tenants::HistoricalReputation))
                    .col(big_integer(Tenants::CreatedAt))
                    .col(big_integer(Tenants::UpdatedAt))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Tenants::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Tenants {
    Table,
    Id,
    Active,
    Plan,
    PerMinuteCap,
    HourlyCap,
    DailyCap,
    VerifiedSenderDomains,
    HistoricalReputation,
    CreatedAt,
    UpdatedAt,
}
