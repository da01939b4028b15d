//! # 调度配置实体占位符

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 调度配置单例（id 固定为 `default`）
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "scheduler_configs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub enabled: bool,
    pub cron_expression: String,
    pub timezone: String,
    pub channel_concurrency: i32,
    pub max_global_concurrency: i32,
    pub min_jitter_ms: i32,
    pub max_jitter_ms: i32,
    pub detect_all_channels: bool,
    /// JSON 数组：选中的渠道 ID 列表，null 表示全部
    pub selected_channel_ids: Option<String>,
    /// JSON 对象：channel_id → [model_id]，null 表示全部
    pub selected_model_ids: Option<String>,
    /// 探测日志保留天数
    pub log_retention_days: i32,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
