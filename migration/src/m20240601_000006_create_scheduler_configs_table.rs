use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SchedulerConfigs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SchedulerConfigs::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SchedulerConfigs::Enabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SchedulerConfigs::CronExpression)
                            .string_len(100)
                            .not_null()
                            .default("0 */6 * * *"),
                    )
                    .col(
                        ColumnDef::new(SchedulerConfigs::Timezone)
                            .string_len(64)
                            .not_null()
                            .default("UTC"),
                    )
                    .col(
                        ColumnDef::new(SchedulerConfigs::ChannelConcurrency)
                            .integer()
                            .not_null()
                            .default(5),
                    )
                    .col(
                        ColumnDef::new(SchedulerConfigs::MaxGlobalConcurrency)
                            .integer()
                            .not_null()
                            .default(30),
                    )
                    .col(
                        ColumnDef::new(SchedulerConfigs::MinJitterMs)
                            .integer()
                            .not_null()
                            .default(3000),
                    )
                    .col(
                        ColumnDef::new(SchedulerConfigs::MaxJitterMs)
                            .integer()
                            .not_null()
                            .default(5000),
                    )
                    .col(
                        ColumnDef::new(SchedulerConfigs::DetectAllChannels)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(SchedulerConfigs::SelectedChannelIds).text())
                    .col(ColumnDef::new(SchedulerConfigs::SelectedModelIds).text())
                    .col(
                        ColumnDef::new(SchedulerConfigs::LogRetentionDays)
                            .integer()
                            .not_null()
                            .default(7),
                    )
                    .col(
                        ColumnDef::new(SchedulerConfigs::UpdatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SchedulerConfigs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SchedulerConfigs {
    Table,
    Id,
    Enabled,
    CronExpression,
    Timezone,
    ChannelConcurrency,
    MaxGlobalConcurrency,
    MinJitterMs,
    MaxJitterMs,
    DetectAllChannels,
    SelectedChannelIds,
    SelectedModelIds,
    LogRetentionDays,
    UpdatedAt,
}
