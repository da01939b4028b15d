//! # 仓储模块
//!
//! 类型化的持久层接口。模型健康的派生在 `persist_probe_outcome` 的事务内
//! 完成，这是并发写同一模型时的串行化边界。

mod probe_store;

pub use probe_store::SeaOrmProbeRepository;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;
use crate::probe::{ModelHealth, ProbeJob, ProbeOutcome};
use crate::{ensure_business, ensure_config};

/// 渠道及其模型
#[derive(Debug, Clone)]
pub struct ChannelWithModels {
    pub channel: entity::channels::Model,
    pub models: Vec<entity::models::Model>,
}

/// 目录同步结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub added: u64,
    pub total: u64,
}

/// 调度配置（领域形态，JSON 列已解析）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub cron_expression: String,
    pub timezone: String,
    pub channel_concurrency: u32,
    pub max_global_concurrency: u32,
    pub min_jitter_ms: u64,
    pub max_jitter_ms: u64,
    pub detect_all_channels: bool,
    pub selected_channel_ids: Option<Vec<i32>>,
    pub selected_model_ids: Option<HashMap<i32, Vec<i32>>>,
    pub log_retention_days: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            cron_expression: "0 */6 * * *".to_string(),
            timezone: "UTC".to_string(),
            channel_concurrency: 5,
            max_global_concurrency: 30,
            min_jitter_ms: 3000,
            max_jitter_ms: 5000,
            detect_all_channels: true,
            selected_channel_ids: None,
            selected_model_ids: None,
            log_retention_days: 7,
        }
    }
}

impl SchedulerSettings {
    /// 校验不变量
    pub fn validate(&self) -> Result<()> {
        ensure_config!(
            self.channel_concurrency >= 1,
            "channel_concurrency 必须大于等于 1"
        );
        ensure_config!(
            self.max_global_concurrency >= self.channel_concurrency,
            "max_global_concurrency ({}) 不能小于 channel_concurrency ({})",
            self.max_global_concurrency,
            self.channel_concurrency
        );
        ensure_config!(
            self.min_jitter_ms <= self.max_jitter_ms,
            "min_jitter_ms ({}) 不能大于 max_jitter_ms ({})",
            self.min_jitter_ms,
            self.max_jitter_ms
        );
        ensure_business!(
            !self.cron_expression.trim().is_empty(),
            "cron 表达式不能为空"
        );
        Ok(())
    }
}

/// 探测状态仓储抽象
#[async_trait]
pub trait ProbeRepository: Send + Sync {
    /// 加载启用的渠道（`sort_order` 升序，相同时创建时间倒序）
    async fn load_enabled_channels(&self, with_models: bool) -> Result<Vec<ChannelWithModels>>;

    /// 按 ID 查渠道
    async fn find_channel(&self, channel_id: i32) -> Result<Option<entity::channels::Model>>;

    /// 按 ID 查模型
    async fn find_model(&self, model_id: i32) -> Result<Option<entity::models::Model>>;

    /// 加载渠道下的模型；`model_ids` 为 None 时取全部
    async fn load_channel_models(
        &self,
        channel_id: i32,
        model_ids: Option<&[i32]>,
    ) -> Result<Vec<entity::models::Model>>;

    /// 重置探测状态：同一事务内删除端点行并把模型置回 unknown
    async fn reset_models_probe_state(&self, model_ids: &[i32]) -> Result<()>;

    /// 持久化单次探测结果：upsert 端点行、追加日志、派生并写回聚合健康。
    /// 整个操作在一个事务内，失败时三者都不落库。
    async fn persist_probe_outcome(
        &self,
        job: &ProbeJob,
        outcome: &ProbeOutcome,
    ) -> Result<ModelHealth>;

    /// 加载调度配置（缺省时落一条 default 单例）
    async fn load_scheduler_config(&self) -> Result<SchedulerSettings>;

    /// 写入调度配置（先校验不变量）
    async fn upsert_scheduler_config(&self, settings: &SchedulerSettings) -> Result<()>;

    /// 清理早于 cutoff 的探测日志，返回删除行数
    async fn purge_check_logs_older_than(&self, cutoff: NaiveDateTime) -> Result<u64>;

    /// 目录同步视图：渠道下全部模型
    async fn list_models_for_sync(&self, channel_id: i32) -> Result<Vec<entity::models::Model>>;

    /// 增量合并模型名单：跳过已有，不删除历史
    async fn replace_or_add_models(&self, channel_id: i32, names: &[String])
        -> Result<SyncOutcome>;

    /// 渠道的附加密钥（按 sort_order 升序）
    async fn list_channel_keys(
        &self,
        channel_id: i32,
    ) -> Result<Vec<entity::channel_keys::Model>>;

    /// 回写附加密钥的校验结果
    async fn update_channel_key_validity(&self, key_id: i32, valid: bool) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_validate() {
        assert!(SchedulerSettings::default().validate().is_ok());

        let mut bad = SchedulerSettings::default();
        bad.channel_concurrency = 0;
        assert!(bad.validate().is_err());

        let mut bad = SchedulerSettings::default();
        bad.max_global_concurrency = 2;
        bad.channel_concurrency = 5;
        assert!(bad.validate().is_err());

        let mut bad = SchedulerSettings::default();
        bad.min_jitter_ms = 9000;
        assert!(bad.validate().is_err());
    }
}
