//! # 渠道密钥校验
//!
//! multi 密钥模式下逐个试探渠道的主密钥与附加密钥是否仍然可用。
//! 附加密钥的校验结果回写 `last_valid` / `last_checked_at`。

use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::business_error;
use crate::error::Result;
use crate::logging::{sanitize_api_key, LogComponent, LogStage};
use crate::probe::strategy::endpoint_kind_for;
use crate::probe::{ProbeExecutor, ProbeJob};
use crate::repository::ProbeRepository;
use crate::{ldebug, linfo};

/// 单个密钥的校验结果
#[derive(Debug, Clone)]
pub struct KeyCheckResult {
    /// 附加密钥 ID；主密钥为 None
    pub key_id: Option<i32>,
    /// 脱敏后的密钥（日志与接口展示用）
    pub api_key_masked: String,
    pub valid: bool,
    pub latency_ms: i32,
    pub error_msg: Option<String>,
}

/// 渠道密钥校验服务
pub struct ChannelKeyService {
    repository: Arc<dyn ProbeRepository>,
    executor: Arc<ProbeExecutor>,
}

impl ChannelKeyService {
    #[must_use]
    pub fn new(repository: Arc<dyn ProbeRepository>, executor: Arc<ProbeExecutor>) -> Self {
        Self {
            repository,
            executor,
        }
    }

    /// 校验渠道的全部密钥；`model_name` 缺省时取渠道下第一个模型
    pub async fn validate_channel_keys(
        &self,
        channel_id: i32,
        model_name: Option<&str>,
    ) -> Result<Vec<KeyCheckResult>> {
        let channel = self
            .repository
            .find_channel(channel_id)
            .await?
            .ok_or_else(|| business_error!("渠道不存在: {channel_id}"))?;

        let model_name = match model_name {
            Some(name) => name.to_string(),
            None => self
                .repository
                .list_models_for_sync(channel_id)
                .await?
                .into_iter()
                .next()
                .map(|m| m.model_name)
                .ok_or_else(|| business_error!("渠道下没有可用于校验的模型: {channel_id}"))?,
        };
        let kind = endpoint_kind_for(&model_name);

        // 主密钥先行，其后按顺序校验附加密钥
        let mut candidates: Vec<(Option<i32>, String)> = vec![(None, channel.api_key.clone())];
        for key in self.repository.list_channel_keys(channel_id).await? {
            candidates.push((Some(key.id), key.api_key));
        }

        let cancel = CancellationToken::new();
        let epoch_ms = Utc::now().timestamp_millis();
        let mut results = Vec::with_capacity(candidates.len());
        for (index, (key_id, api_key)) in candidates.into_iter().enumerate() {
            let job = ProbeJob {
                job_id: format!("keycheck-{channel_id}-{index}-{epoch_ms}"),
                channel_id,
                model_id: 0,
                model_name: model_name.clone(),
                endpoint_kind: kind,
                base_url: channel.base_url.clone(),
                api_key,
                proxy_url: channel.proxy_url.clone(),
            };
            let outcome = self.executor.execute(&job, &cancel).await;
            let valid = outcome.status.is_success();

            if let Some(key_id) = key_id {
                self.repository
                    .update_channel_key_validity(key_id, valid)
                    .await?;
            }

            ldebug!(
                &job.job_id,
                LogStage::Probe,
                LogComponent::KeyPool,
                "key_checked",
                "密钥校验完成",
                key_id = ?key_id,
                valid = valid
            );
            results.push(KeyCheckResult {
                key_id,
                api_key_masked: sanitize_api_key(&job.api_key),
                valid,
                latency_ms: outcome.latency_ms,
                error_msg: outcome.error_msg,
            });
        }

        linfo!(
            "system",
            LogStage::Probe,
            LogComponent::KeyPool,
            "channel_keys_validated",
            "渠道密钥校验完成",
            channel_id = channel_id,
            total = results.len(),
            valid = results.iter().filter(|r| r.valid).count()
        );
        Ok(results)
    }
}
