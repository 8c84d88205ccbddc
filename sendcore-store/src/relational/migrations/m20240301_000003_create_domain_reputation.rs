use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DomainReputation::Table)
                    .if_not_exists()
                    .col(string(DomainReputation::Domain).primary_key())
                    .col(big_integer(DomainReputation::ScoreMilli))
                    .col(big_integer(DomainReputation::Successful))
                    .col(big_integer(DomainReputation::Failed))
                    .col(big_integer_null(DomainReputation::LastSuccess))
                    .col(big_integer_null(DomainReputation::LastFailure))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DomainReputation::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum DomainReputation {
    Table,
    Domain,
    ScoreMilli,
    Successful,
    Failed,
    LastSuccess,
    LastFailure,
}
