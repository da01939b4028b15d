use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChannelKeys::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChannelKeys::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ChannelKeys::ChannelId).integer().not_null())
                    .col(
                        ColumnDef::new(ChannelKeys::ApiKey)
                            .string_len(512)
                            .not_null(),
                    )
                    .col(ColumnDef::new(ChannelKeys::LastValid).boolean())
                    .col(ColumnDef::new(ChannelKeys::LastCheckedAt).timestamp())
                    .col(
                        ColumnDef::new(ChannelKeys::SortOrder)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ChannelKeys::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_channel_keys_channel_id")
                            .from(ChannelKeys::Table, ChannelKeys::ChannelId)
                            .to(Channels::Table, Channels::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_channel_keys_channel_sort")
                    .table(ChannelKeys::Table)
                    .col(ChannelKeys::ChannelId)
                    .col(ChannelKeys::SortOrder)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ChannelKeys::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ChannelKeys {
    Table,
    Id,
    ChannelId,
    ApiKey,
    LastValid,
    LastCheckedAt,
    SortOrder,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Channels {
    Table,
    Id,
}
