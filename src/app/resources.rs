use redis::aio::ConnectionManager;
use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{ProbeError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::linfo;

/// 应用基础资源：配置、数据库与可选的 Redis 连接
pub struct AppResources {
    config: Arc<AppConfig>,
    database: Arc<DatabaseConnection>,
    redis: Option<RedisHandles>,
}

/// Redis 连接句柄：命令连接 + 用于 pub/sub 的原始客户端
#[derive(Clone)]
pub struct RedisHandles {
    pub manager: ConnectionManager,
    pub client: redis::Client,
}

impl AppResources {
    /// 构建资源层；配置了 `BROKER_URL` 时建立 Redis 连接
    pub async fn build(
        config: Arc<AppConfig>,
        database: Arc<DatabaseConnection>,
    ) -> Result<Arc<Self>> {
        let redis = match &config.redis {
            Some(redis_config) => {
                linfo!(
                    "system",
                    LogStage::Startup,
                    LogComponent::Cache,
                    "redis_connect",
                    "正在连接 Redis broker"
                );
                let client = redis::Client::open(redis_config.url.as_str())
                    .map_err(|e| ProbeError::cache_with_source("创建 Redis 客户端失败", e))?;
                let manager = ConnectionManager::new(client.clone())
                    .await
                    .map_err(|e| ProbeError::cache_with_source("建立 Redis 连接失败", e))?;
                linfo!(
                    "system",
                    LogStage::Startup,
                    LogComponent::Cache,
                    "redis_connected",
                    "Redis 连接建立成功"
                );
                Some(RedisHandles { manager, client })
            }
            None => None,
        };

        Ok(Arc::new(Self {
            config,
            database,
            redis,
        }))
    }

    #[must_use]
    pub fn config(&self) -> Arc<AppConfig> {
        Arc::clone(&self.config)
    }

    #[must_use]
    pub fn database(&self) -> Arc<DatabaseConnection> {
        Arc::clone(&self.database)
    }

    #[must_use]
    pub fn redis(&self) -> Option<&RedisHandles> {
        self.redis.as_ref()
    }
}
