//! # 模型实体定义
//!
//! 渠道下的模型及其派生聚合健康状态；`(channel_id, model_name)` 唯一

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 模型实体
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "models")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub channel_id: i32,
    pub model_name: String,
    /// 聚合健康状态：healthy / partial / unhealthy / unknown
    pub health_status: String,
    /// 最近一次探测是否可用：null=未探测
    pub last_status: Option<bool>,
    pub last_latency_ms: Option<i32>,
    pub last_checked_at: Option<DateTime>,
    /// 可选绑定到特定附加密钥；密钥删除时置空
    pub channel_key_id: Option<i32>,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::channels::Entity",
        from = "Column::ChannelId",
        to = "super::channels::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Channel,
    #[sea_orm(
        belongs_to = "super::channel_keys::Entity",
        from = "Column::ChannelKeyId",
        to = "super::channel_keys::Column::Id",
        on_update = "Cascade",
        on_delete = "SetNull"
    )]
    ChannelKey,
    #[sea_orm(has_many = "super::model_endpoints::Entity")]
    ModelEndpoints,
    #[sea_orm(has_many = "super::check_logs::Entity")]
    CheckLogs,
}

impl Related<super::channels::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Channel.def()
    }
}

impl Related<super::channel_keys::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChannelKey.def()
    }
}

impl Related<super::model_endpoints::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ModelEndpoints.def()
    }
}

impl Related<super::check_logs::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CheckLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
