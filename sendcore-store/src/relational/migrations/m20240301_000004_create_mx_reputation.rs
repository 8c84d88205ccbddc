use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MxReputation::Table)
                    .if_not_exists()
                    .col(pk_auto(MxReputation::Id))
                    .col(string(MxReputation::MxServer))
                    .col(string(MxReputation::Domain))
                    .col(big_integer(MxReputation::ScoreMilli))
                    .col(big_integer(MxReputation::Successful))
                    .col(big_integer(MxReputation::Failed))
                    .col(big_integer(MxReputation::AvgResponseMilliMs))
                    .col(big_integer_null(MxReputation::LastSuccess))
                    .col(big_integer_null(MxReputation::LastFailure))
                    .col(text(MxReputation::RecentFailureReasons))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_mx_reputation_server_domain")
                    .table(MxReputation::Table)
                    .col(MxReputation::MxServer)
                    .col(MxReputation::Domain)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MxReputation::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum MxReputation {
    Table,
    Id,
    MxServer,
    Domain,
    ScoreMilli,
    Successful,
    Failed,
    AvgResponseMilliMs,
    LastSuccess,
    LastFailure,
    RecentFailureReasons,
}
