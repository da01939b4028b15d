//! # 检测服务
//!
//! 把用户意图（全量 / 单渠道 / 单模型 / 按选择）翻译成探测任务批次。
//! 入队前必须先提交模型重置；被撤下的任务由 worker 池补写取消结果。

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::admission::AdmissionController;
use crate::business_error;
use crate::catalog::CatalogSync;
use crate::error::Result;
use crate::logging::{LogComponent, LogStage};
use crate::probe::strategy::endpoints_to_probe;
use crate::probe::{EndpointKind, ProbeJob};
use crate::queue::{ProbeQueue, QueueStats};
use crate::repository::{ProbeRepository, SyncOutcome};
use crate::worker::WorkerPool;
use crate::{linfo, lwarn};

/// 触发结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectionTriggerResult {
    pub channels: u32,
    pub model_count: u32,
    pub job_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_results: Option<HashMap<i32, SyncOutcome>>,
}

/// 停止结果
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StopResult {
    pub cleared: u64,
}

/// 面向仪表盘的进度快照
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    pub total: u64,
    pub is_running: bool,
    pub progress_percent: u8,
    pub testing_model_ids: Vec<i32>,
}

impl ProgressSnapshot {
    fn from_stats(stats: QueueStats, mut testing_model_ids: Vec<i32>) -> Self {
        testing_model_ids.sort_unstable();
        Self {
            waiting: stats.waiting,
            active: stats.active,
            completed: stats.completed,
            failed: stats.failed,
            delayed: stats.delayed,
            total: stats.total(),
            is_running: stats.is_running(),
            progress_percent: stats.progress_percent(),
            testing_model_ids,
        }
    }
}

/// 检测服务
pub struct DetectionService {
    repository: Arc<dyn ProbeRepository>,
    queue: Arc<dyn ProbeQueue>,
    admission: Arc<dyn AdmissionController>,
    worker: Arc<WorkerPool>,
    catalog: Arc<CatalogSync>,
    /// 配置驱动的补充 chat 探测名单（默认空）
    secondary_chat_kinds: Vec<EndpointKind>,
}

impl DetectionService {
    #[must_use]
    pub fn new(
        repository: Arc<dyn ProbeRepository>,
        queue: Arc<dyn ProbeQueue>,
        admission: Arc<dyn AdmissionController>,
        worker: Arc<WorkerPool>,
        catalog: Arc<CatalogSync>,
        secondary_chat_kinds: Vec<EndpointKind>,
    ) -> Self {
        Self {
            repository,
            queue,
            admission,
            worker,
            catalog,
            secondary_chat_kinds,
        }
    }

    /// 全量检测：所有启用渠道的所有模型
    pub async fn trigger_full(&self, sync_first: bool) -> Result<DetectionTriggerResult> {
        self.queue.clear_stopped_flag().await?;

        let channels = self.repository.load_enabled_channels(true).await?;
        let mut sync_results = None;

        let mut batch: Vec<(entity::channels::Model, Vec<entity::models::Model>)> = Vec::new();
        if sync_first {
            let mut results = HashMap::new();
            for entry in &channels {
                match self.catalog.sync_channel(&entry.channel).await {
                    Ok(outcome) => {
                        results.insert(entry.channel.id, outcome);
                    }
                    Err(e) => {
                        lwarn!(
                            "system",
                            LogStage::Sync,
                            LogComponent::Detection,
                            "sync_failed",
                            "渠道目录同步失败，继续检测",
                            channel_id = entry.channel.id,
                            error = %e
                        );
                    }
                }
                // 同步可能新增模型，重新加载
                let models = self
                    .repository
                    .load_channel_models(entry.channel.id, None)
                    .await?;
                batch.push((entry.channel.clone(), models));
            }
            sync_results = Some(results);
        } else {
            for entry in &channels {
                batch.push((entry.channel.clone(), entry.models.clone()));
            }
        }

        self.reset_and_enqueue(batch, sync_results).await
    }

    /// 单渠道检测；`model_ids` 给定时只针对这些模型
    pub async fn trigger_channel(
        &self,
        channel_id: i32,
        model_ids: Option<&[i32]>,
    ) -> Result<DetectionTriggerResult> {
        self.queue.clear_stopped_flag().await?;

        let channel = self
            .repository
            .find_channel(channel_id)
            .await?
            .ok_or_else(|| business_error!("渠道不存在: {channel_id}"))?;
        if !channel.enabled {
            return Err(business_error!("渠道已停用: {channel_id}"));
        }

        let models = self
            .repository
            .load_channel_models(channel_id, model_ids)
            .await?;
        self.reset_and_enqueue(vec![(channel, models)], None).await
    }

    /// 单模型检测
    pub async fn trigger_model(&self, model_id: i32) -> Result<DetectionTriggerResult> {
        self.queue.clear_stopped_flag().await?;

        let model = self
            .repository
            .find_model(model_id)
            .await?
            .ok_or_else(|| business_error!("模型不存在: {model_id}"))?;
        let channel = self
            .repository
            .find_channel(model.channel_id)
            .await?
            .ok_or_else(|| business_error!("渠道不存在: {}", model.channel_id))?;

        self.reset_and_enqueue(vec![(channel, vec![model])], None)
            .await
    }

    /// 按选择检测：可指定渠道集合与每渠道的模型集合；入队前逐渠道同步，
    /// 同步失败只记日志
    pub async fn trigger_selective(
        &self,
        channel_ids: Option<&[i32]>,
        model_ids_by_channel: Option<&HashMap<i32, Vec<i32>>>,
    ) -> Result<DetectionTriggerResult> {
        self.queue.clear_stopped_flag().await?;

        let channels = self.repository.load_enabled_channels(false).await?;
        let mut sync_results = HashMap::new();
        let mut batch = Vec::new();

        for entry in channels {
            if let Some(ids) = channel_ids {
                if !ids.contains(&entry.channel.id) {
                    continue;
                }
            }

            match self.catalog.sync_channel(&entry.channel).await {
                Ok(outcome) => {
                    sync_results.insert(entry.channel.id, outcome);
                }
                Err(e) => {
                    lwarn!(
                        "system",
                        LogStage::Sync,
                        LogComponent::Detection,
                        "sync_failed",
                        "渠道目录同步失败，继续检测",
                        channel_id = entry.channel.id,
                        error = %e
                    );
                }
            }

            let selected = model_ids_by_channel.and_then(|map| map.get(&entry.channel.id));
            let models = self
                .repository
                .load_channel_models(entry.channel.id, selected.map(Vec::as_slice))
                .await?;
            batch.push((entry.channel, models));
        }

        self.reset_and_enqueue(batch, Some(sync_results)).await
    }

    /// 停止检测：立旗、清队列、补写被撤任务的取消结果、清准入计数
    pub async fn stop_detection(&self) -> Result<StopResult> {
        let drained = self.queue.stop_and_drain().await?;
        self.admission.reset_all().await?;
        self.worker.record_drained_jobs(&drained.jobs).await;
        linfo!(
            "system",
            LogStage::Detection,
            LogComponent::Detection,
            "stop_detection",
            "检测停止完成",
            cleared = drained.cleared
        );
        Ok(StopResult {
            cleared: drained.cleared,
        })
    }

    /// 当前进度快照
    pub async fn progress_snapshot(&self) -> Result<ProgressSnapshot> {
        let stats = self.queue.stats().await?;
        let testing = self.queue.testing_model_ids().await?;
        Ok(ProgressSnapshot::from_stats(
            stats,
            testing.into_iter().collect(),
        ))
    }

    /// 重置目标模型并入队。重置事务先提交，任务才对队列可见。
    async fn reset_and_enqueue(
        &self,
        batch: Vec<(entity::channels::Model, Vec<entity::models::Model>)>,
        sync_results: Option<HashMap<i32, SyncOutcome>>,
    ) -> Result<DetectionTriggerResult> {
        let model_ids: Vec<i32> = batch
            .iter()
            .flat_map(|(_, models)| models.iter().map(|m| m.id))
            .collect();
        self.repository.reset_models_probe_state(&model_ids).await?;

        let epoch_ms = Utc::now().timestamp_millis();
        let mut jobs = Vec::new();
        for (channel, models) in &batch {
            for model in models {
                let kinds = endpoints_to_probe(&model.model_name, &self.secondary_chat_kinds);
                for kind in kinds {
                    let index = jobs.len();
                    jobs.push(ProbeJob {
                        job_id: ProbeJob::make_job_id(
                            channel.id,
                            model.id,
                            kind,
                            epoch_ms,
                            Some(index),
                        ),
                        channel_id: channel.id,
                        model_id: model.id,
                        model_name: model.model_name.clone(),
                        endpoint_kind: kind,
                        base_url: channel.base_url.clone(),
                        api_key: channel.api_key.clone(),
                        proxy_url: channel.proxy_url.clone(),
                    });
                }
            }
        }

        let job_ids: Vec<String> = jobs.iter().map(|j| j.job_id.clone()).collect();
        let channels = batch.len() as u32;
        let model_count = model_ids.len() as u32;
        self.queue.enqueue_bulk(jobs).await?;

        linfo!(
            "system",
            LogStage::Enqueue,
            LogComponent::Detection,
            "batch_enqueued",
            "检测批次已入队",
            channels = channels,
            models = model_count,
            jobs = job_ids.len()
        );

        Ok(DetectionTriggerResult {
            channels,
            model_count,
            job_ids,
            sync_results,
        })
    }
}
