use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Models::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Models::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Models::ChannelId).integer().not_null())
                    .col(
                        ColumnDef::new(Models::ModelName)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Models::HealthStatus)
                            .string_len(20)
                            .not_null()
                            .default("unknown"),
                    )
                    .col(ColumnDef::new(Models::LastStatus).boolean())
                    .col(ColumnDef::new(Models::LastLatencyMs).integer())
                    .col(ColumnDef::new(Models::LastCheckedAt).timestamp())
                    .col(ColumnDef::new(Models::ChannelKeyId).integer())
                    .col(
                        ColumnDef::new(Models::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_models_channel_id")
                            .from(Models::Table, Models::ChannelId)
                            .to(Channels::Table, Channels::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_models_channel_key_id")
                            .from(Models::Table, Models::ChannelKeyId)
                            .to(ChannelKeys::Table, ChannelKeys::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_models_unique_channel_name")
                    .table(Models::Table)
                    .col(Models::ChannelId)
                    .col(Models::ModelName)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_models_health_status")
                    .table(Models::Table)
                    .col(Models::HealthStatus)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Models::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Models {
    Table,
    Id,
    ChannelId,
    ModelName,
    HealthStatus,
    LastStatus,
    LastLatencyMs,
    LastCheckedAt,
    ChannelKeyId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Channels {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum ChannelKeys {
    Table,
    Id,
}
