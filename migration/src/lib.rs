pub use sea_orm_migration::prelude::*;

mod m20240601_000001_create_channels_table;
mod m20240601_000002_create_channel_keys_table;
mod m20240601_000003_create_models_table;
mod m20240601_000004_create_model_endpoints_table;
mod m20240601_000005_create_check_logs_table;
mod m20240601_000006_create_scheduler_configs_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_channels_table::Migration),
            Box::new(m20240601_000002_create_channel_keys_table::Migration),
            Box::new(m20240601_000003_create_models_table::Migration),
            Box::new(m20240601_000004_create_model_endpoints_table::Migration),
            Box::new(m20240601_000005_create_check_logs_table::Migration),
            Box::new(m20240601_000006_create_scheduler_configs_table::Migration),
        ]
    }
}
