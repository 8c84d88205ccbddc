use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MessageIds::Table)
                    .if_not_exists()
                    .col(string(MessageIds::MessageId).primary_key())
                    .col(big_integer(MessageIds::ReservedAt))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MessageIds::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum MessageIds {
    Table,
    MessageId,
    ReservedAt,
}
