use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ModelEndpoints::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ModelEndpoints::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ModelEndpoints::ModelId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ModelEndpoints::EndpointKind)
                            .string_len(10)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ModelEndpoints::Status)
                            .string_len(10)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ModelEndpoints::LatencyMs)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ModelEndpoints::StatusCode).integer())
                    .col(ColumnDef::new(ModelEndpoints::ErrorMsg).text())
                    .col(ColumnDef::new(ModelEndpoints::ResponseContent).text())
                    .col(
                        ColumnDef::new(ModelEndpoints::CheckedAt)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_model_endpoints_model_id")
                            .from(ModelEndpoints::Table, ModelEndpoints::ModelId)
                            .to(Models::Table, Models::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // 每个模型每种端点只保留一行
        manager
            .create_index(
                Index::create()
                    .name("idx_model_endpoints_unique_slot")
                    .table(ModelEndpoints::Table)
                    .col(ModelEndpoints::ModelId)
                    .col(ModelEndpoints::EndpointKind)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ModelEndpoints::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ModelEndpoints {
    Table,
    Id,
    ModelId,
    EndpointKind,
    Status,
    LatencyMs,
    StatusCode,
    ErrorMsg,
    ResponseContent,
    CheckedAt,
}

#[derive(DeriveIden)]
enum Models {
    Table,
    Id,
}
