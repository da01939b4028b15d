use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CheckLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CheckLogs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CheckLogs::ModelId).integer().not_null())
                    .col(
                        ColumnDef::new(CheckLogs::EndpointKind)
                            .string_len(10)
                            .not_null(),
                    )
                    .col(ColumnDef::new(CheckLogs::Status).string_len(10).not_null())
                    .col(
                        ColumnDef::new(CheckLogs::LatencyMs)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(CheckLogs::StatusCode).integer())
                    .col(ColumnDef::new(CheckLogs::ErrorMsg).text())
                    .col(ColumnDef::new(CheckLogs::ResponseContent).text())
                    .col(
                        ColumnDef::new(CheckLogs::CreatedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_check_logs_model_id")
                            .from(CheckLogs::Table, CheckLogs::ModelId)
                            .to(Models::Table, Models::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // 面向历史查询
        manager
            .create_index(
                Index::create()
                    .name("idx_check_logs_model_created")
                    .table(CheckLogs::Table)
                    .col(CheckLogs::ModelId)
                    .col((CheckLogs::CreatedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        // 面向保留清理
        manager
            .create_index(
                Index::create()
                    .name("idx_check_logs_created_at")
                    .table(CheckLogs::Table)
                    .col(CheckLogs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CheckLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum CheckLogs {
    Table,
    Id,
    ModelId,
    EndpointKind,
    Status,
    LatencyMs,
    StatusCode,
    ErrorMsg,
    ResponseContent,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Models {
    Table,
    Id,
}
