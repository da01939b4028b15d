//! # 探测日志实体定义
//!
//! 只追加的探测历史记录；按保留天数定期清理

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 探测日志实体
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "check_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub model_id: i32,
    pub endpoint_kind: String,
    pub status: String,
    pub latency_ms: i32,
    pub status_code: Option<i32>,
    pub error_msg: Option<String>,
    pub response_content: Option<String>,
    pub created_at: DateTime,
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
