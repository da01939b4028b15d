//! # 模型目录同步
//!
//! 调上游 `/v1/models`，把缺失的模型名合并进本地目录。只增不删，
//! 历史条目保留。

use std::sync::Arc;

use crate::error::{ProbeError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::probe::strategy::{normalize_base_url, parse_model_list};
use crate::probe::ProbeExecutor;
use crate::repository::{ProbeRepository, SyncOutcome};
use crate::{ldebug, linfo};

/// 模型目录同步服务
pub struct CatalogSync {
    repository: Arc<dyn ProbeRepository>,
    executor: Arc<ProbeExecutor>,
}

impl CatalogSync {
    #[must_use]
    pub fn new(repository: Arc<dyn ProbeRepository>, executor: Arc<ProbeExecutor>) -> Self {
        Self {
            repository,
            executor,
        }
    }

    /// 同步单个渠道的模型目录
    pub async fn sync_channel(&self, channel: &entity::channels::Model) -> Result<SyncOutcome> {
        let client = self
            .executor
            .client_for(channel.proxy_url.as_deref())
            .map_err(ProbeError::network)?;

        let url = format!("{}/v1/models", normalize_base_url(&channel.base_url));
        ldebug!(
            "system",
            LogStage::Sync,
            LogComponent::CatalogSync,
            "model_list_request",
            "请求上游模型列表",
            channel_id = channel.id,
            url = %url
        );

        let response = client
            .get(&url)
            .header("authorization", format!("Bearer {}", channel.api_key))
            .send()
            .await
            .map_err(|e| ProbeError::network_with_source("模型列表请求失败", e))?;

        let http_status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProbeError::network_with_source("模型列表响应读取失败", e))?;

        if !http_status.is_success() {
            return Err(ProbeError::network(format!(
                "模型列表请求失败: HTTP {}",
                http_status.as_u16()
            )));
        }

        let names = parse_model_list(&body);
        if names.is_empty() {
            return Err(ProbeError::business("empty model list"));
        }

        let outcome = self
            .repository
            .replace_or_add_models(channel.id, &names)
            .await?;

        linfo!(
            "system",
            LogStage::Sync,
            LogComponent::CatalogSync,
            "model_list_synced",
            "模型目录同步完成",
            channel_id = channel.id,
            added = outcome.added,
            total = outcome.total
        );
        Ok(outcome)
    }
}
