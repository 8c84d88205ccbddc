use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SuppressionEntries::Table)
                    .if_not_exists()
                    .col(pk_auto(SuppressionEntries::Id))
                    .col(string(SuppressionEntries::TenantId))
                    .col(string(SuppressionEntries::Email))
                    .col(string(SuppressionEntries::Kind))
                    .col(string_null(SuppressionEntries::BounceType))
                    .col(string_null(SuppressionEntries::Reason))
                    .col(text(SuppressionEntries::Metadata))
                    .col(big_integer(SuppressionEntries::CreatedAt))
                    .col(big_integer(SuppressionEntries::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_suppression_entries_tenant_email")
                    .table(SuppressionEntries::Table)
                    .col(SuppressionEntries::TenantId)
                    .col(SuppressionEntries::Email)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SuppressionEntries::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum SuppressionEntries {
    Table,
    Id,
    TenantId,
    Email,
    Kind,
    BounceType,
    Reason,
    Metadata,
    CreatedAt,
    UpdatedAt,
}
