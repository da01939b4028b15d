use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Channels::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Channels::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Channels::Name).string_len(100).not_null())
                    .col(
                        ColumnDef::new(Channels::BaseUrl)
                            .string_len(512)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Channels::ApiKey).string_len(512).not_null())
                    .col(
                        ColumnDef::new(Channels::KeyMode)
                            .string_len(10)
                            .not_null()
                            .default("single"),
                    )
                    .col(ColumnDef::new(Channels::ProxyUrl).string_len(512))
                    .col(
                        ColumnDef::new(Channels::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Channels::SortOrder)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Channels::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Channels::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // 渠道名唯一（大小写不敏感由仓储层归一化保证）
        manager
            .create_index(
                Index::create()
                    .name("idx_channels_unique_name")
                    .table(Channels::Table)
                    .col(Channels::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_channels_enabled_sort")
                    .table(Channels::Table)
                    .col(Channels::Enabled)
                    .col(Channels::SortOrder)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Channels::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Channels {
    Table,
    Id,
    Name,
    BaseUrl,
    ApiKey,
    KeyMode,
    ProxyUrl,
    Enabled,
    SortOrder,
    CreatedAt,
    UpdatedAt,
}
