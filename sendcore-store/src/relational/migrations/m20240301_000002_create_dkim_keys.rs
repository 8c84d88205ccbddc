use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DkimKeys::Table)
                    .if_not_exists()
                    .col(pk_auto(DkimKeys::Id))
                    .col(string(DkimKeys::Domain))
                    .col(string(DkimKeys::Selector))
                    .col(text(DkimKeys::PrivateKeyPem))
                    .col(text(DkimKeys::PublicKeyB64))
                    .col(string(DkimKeys::Algorithm))
                    .col(string(DkimKeys::Canonicalization))
                    .col(string(DkimKeys::KeySize))
                    .col(boolean(DkimKeys::Active))
                    .col(big_integer(DkimKeys::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_dkim_keys_domain_selector")
                    .table(DkimKeys::Table)
                    .col(DkimKeys::Domain)
                    .col(DkimKeys::Selector)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DkimKeys::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum DkimKeys {
    Table,
    Id,
    Domain,
    Selector,
    PrivateKeyPem,
    PublicKeyB64,
    Algorithm,
    Canonicalization,
    KeySize,
    Active,
    CreatedAt,
}
