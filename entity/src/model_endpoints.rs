//! # 模型端点状态实体定义
//!
//! 每个模型按端点类型各保留一行最新探测结果；`(model_id, endpoint_kind)` 唯一

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 模型端点状态实体
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "model_endpoints")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub model_id: i32,
    /// 端点类型：chat / claude / gemini / codex / image
    pub endpoint_kind: String,
    /// 探测结果：success / fail
    pub status: String,
    pub latency_ms: i32,
    pub status_code: Option<i32>,
    pub error_msg: Option<String>,
    /// 响应体前 2KB
    pub response_content: Option<String>,
    pub checked_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::models::Entity",
        from = "Column::ModelId",
        to = "super::models::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    ModelEntity,
}

impl Related<super::models::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ModelEntity.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
