//! # 渠道实体定义
//!
//! 上游渠道表的 Sea-ORM 实体模型（baseUrl + 主密钥 + 可选附加密钥与代理）

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 上游渠道实体
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "channels")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// 渠道名称（唯一，不区分大小写）
    pub name: String,
    /// 上游基地址，不带尾部斜杠
    pub base_url: String,
    /// 主 API 密钥
    pub api_key: String,
    /// 密钥模式：single / multi
    pub key_mode: String,
    /// 出站代理地址（http/https/socks5/socks4）
    pub proxy_url: Option<String>,
    pub enabled: bool,
    /// 排序权重，升序排列，相同时按创建时间倒序
    pub sort_order: i32,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::models::Entity")]
    Models,
    #[sea_orm(has_many = "super::channel_keys::Entity")]
    ChannelKeys,
}

impl Related<super::models::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Models.def()
    }
}

impl Related<super::channel_keys::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChannelKeys.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
