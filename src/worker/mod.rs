//! # 探测 worker 池
//!
//! 从队列拉取任务，按状态机推进：
//! 出队 → 取消检查 → 准入 → 二次取消检查 → 随机抖动 → 探测 → 落库 →
//! 发布进度 → 释放槽位。取消在出队与拿到槽位后各检查一次，堵住等待期间
//! 立旗的竞态；被取消的任务同样落库并发布，UI 状态才能收敛。

use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::admission::{AcquireOutcome, AdmissionController, AdmissionLimits};
use crate::config::WorkerDefaults;
use crate::error::Result;
use crate::logging::{LogComponent, LogStage};
use crate::probe::{ProbeExecutor, ProbeJob, ProbeOutcome, ProbeStatus};
use crate::progress::{ProgressBus, ProgressEvent};
use crate::queue::ProbeQueue;
use crate::repository::{ProbeRepository, SchedulerSettings};
use crate::{ldebug, lerror, linfo, lwarn};

/// worker 并发拉取数
pub const WORKER_FAN_OUT: usize = 50;

/// 调度配置记忆化时长
const CONFIG_CACHE_TTL: Duration = Duration::from_secs(5);

/// 队列空闲时的拉取间隔
const IDLE_POLL: Duration = Duration::from_millis(200);

/// worker 运行参数（来自调度配置，5 秒记忆化）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    pub channel_concurrency: u32,
    pub max_global_concurrency: u32,
    pub min_jitter_ms: u64,
    pub max_jitter_ms: u64,
}

impl WorkerConfig {
    fn from_settings(settings: &SchedulerSettings) -> Self {
        Self {
            channel_concurrency: settings.channel_concurrency,
            max_global_concurrency: settings.max_global_concurrency,
            min_jitter_ms: settings.min_jitter_ms,
            max_jitter_ms: settings.max_jitter_ms,
        }
    }

    fn from_defaults(defaults: &WorkerDefaults) -> Self {
        Self {
            channel_concurrency: defaults.channel_concurrency,
            max_global_concurrency: defaults.max_global_concurrency,
            min_jitter_ms: defaults.min_jitter_ms,
            max_jitter_ms: defaults.max_jitter_ms,
        }
    }
}

struct CachedConfig {
    loaded_at: Instant,
    config: WorkerConfig,
}

/// 探测 worker 池
pub struct WorkerPool {
    queue: Arc<dyn ProbeQueue>,
    admission: Arc<dyn AdmissionController>,
    repository: Arc<dyn ProbeRepository>,
    executor: Arc<ProbeExecutor>,
    bus: Arc<ProgressBus>,
    defaults: WorkerDefaults,
    fan_out: usize,
    shutdown: CancellationToken,
    config_cache: tokio::sync::Mutex<Option<CachedConfig>>,
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(
        queue: Arc<dyn ProbeQueue>,
        admission: Arc<dyn AdmissionController>,
        repository: Arc<dyn ProbeRepository>,
        executor: Arc<ProbeExecutor>,
        bus: Arc<ProgressBus>,
        defaults: WorkerDefaults,
        fan_out: usize,
    ) -> Self {
        Self {
            queue,
            admission,
            repository,
            executor,
            bus,
            defaults,
            fan_out,
            shutdown: CancellationToken::new(),
            config_cache: tokio::sync::Mutex::new(None),
            handles: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// 启动 worker（重复调用不会产生第二组 worker）
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Ok(());
        }
        for index in 0..self.fan_out {
            let pool = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                pool.worker_loop(index).await;
            }));
        }
        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::Worker,
            "worker_pool_started",
            "探测 worker 池已启动",
            fan_out = self.fan_out
        );
        Ok(())
    }

    /// 停止所有 worker 并等待退出
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::Worker,
            "worker_pool_stopped",
            "探测 worker 池已停止"
        );
    }

    /// 手动失效配置缓存（调度配置保存后调用）
    pub async fn reload_config(&self) {
        *self.config_cache.lock().await = None;
    }

    /// 取运行配置：5 秒记忆化，同时把并发上限同步给准入控制器
    pub async fn current_config(&self) -> WorkerConfig {
        {
            let cache = self.config_cache.lock().await;
            if let Some(cached) = cache.as_ref() {
                if cached.loaded_at.elapsed() < CONFIG_CACHE_TTL {
                    return cached.config;
                }
            }
        }

        let config = match self.repository.load_scheduler_config().await {
            Ok(settings) => WorkerConfig::from_settings(&settings),
            Err(e) => {
                lwarn!(
                    "system",
                    LogStage::Db,
                    LogComponent::Worker,
                    "config_load_failed",
                    "调度配置读取失败，回退到启动缺省值",
                    error = %e
                );
                WorkerConfig::from_defaults(&self.defaults)
            }
        };

        self.admission
            .set_limits(AdmissionLimits::new(
                config.max_global_concurrency,
                config.channel_concurrency,
            ))
            .await;

        let mut cache = self.config_cache.lock().await;
        *cache = Some(CachedConfig {
            loaded_at: Instant::now(),
            config,
        });
        config
    }

    async fn worker_loop(self: Arc<Self>, worker_index: usize) {
        ldebug!(
            "system",
            LogStage::Startup,
            LogComponent::Worker,
            "worker_loop_start",
            "worker 启动",
            worker_index = worker_index
        );
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            match self.queue.pull_next(&|_| true).await {
                Ok(Some(job)) => self.process_job(job).await,
                Ok(None) => {
                    tokio::select! {
                        () = self.shutdown.cancelled() => break,
                        () = tokio::time::sleep(IDLE_POLL) => {}
                    }
                }
                Err(e) => {
                    lwarn!(
                        "system",
                        LogStage::Internal,
                        LogComponent::Worker,
                        "pull_failed",
                        "队列拉取失败",
                        error = %e
                    );
                    tokio::select! {
                        () = self.shutdown.cancelled() => break,
                        () = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
    }

    /// 单任务状态机
    async fn process_job(&self, job: ProbeJob) {
        // DEQUEUED：出队即检查停止标志
        if self.queue.stopped_flag().await {
            self.finish_job(&job, ProbeOutcome::canceled(job.endpoint_kind))
                .await;
            return;
        }

        let config = self.current_config().await;

        // ACQUIRING：全局 + 渠道两级槽位
        match self.admission.acquire(job.channel_id, &self.shutdown).await {
            Ok(AcquireOutcome::Acquired) => {}
            Ok(AcquireOutcome::Stopped) => {
                self.finish_job(&job, ProbeOutcome::canceled(job.endpoint_kind))
                    .await;
                return;
            }
            Err(e) => {
                // broker 队列的重试机制会把任务送回等待；进程内队列记失败
                lwarn!(
                    &job.job_id,
                    LogStage::Admission,
                    LogComponent::Worker,
                    "acquire_failed",
                    "准入槽位获取失败",
                    error = %e
                );
                if let Err(e) = self.queue.mark_done(&job.job_id, false).await {
                    lwarn!(
                        &job.job_id,
                        LogStage::Internal,
                        LogComponent::Worker,
                        "mark_done_failed",
                        "任务状态回写失败",
                        error = %e
                    );
                }
                return;
            }
        }

        // 拿到槽位后立即复查，堵住等待期间立旗的竞态
        if self.queue.stopped_flag().await {
            self.release_slots(job.channel_id).await;
            self.finish_job(&job, ProbeOutcome::canceled(job.endpoint_kind))
                .await;
            return;
        }

        // JITTER：打散突发，避免同一时刻压向上游
        let jitter_ms = if config.max_jitter_ms > config.min_jitter_ms {
            rand::thread_rng().gen_range(config.min_jitter_ms..=config.max_jitter_ms)
        } else {
            config.min_jitter_ms
        };
        tokio::select! {
            () = self.shutdown.cancelled() => {
                self.release_slots(job.channel_id).await;
                self.finish_job(&job, ProbeOutcome::canceled(job.endpoint_kind)).await;
                return;
            }
            () = tokio::time::sleep(Duration::from_millis(jitter_ms)) => {}
        }
        if self.queue.stopped_flag().await {
            self.release_slots(job.channel_id).await;
            self.finish_job(&job, ProbeOutcome::canceled(job.endpoint_kind))
                .await;
            return;
        }

        // PROBING
        let outcome = self.executor.execute(&job, &self.shutdown).await;

        // PERSIST + PUBLISH
        self.finish_job(&job, outcome).await;

        // RELEASE
        self.release_slots(job.channel_id).await;
    }

    async fn release_slots(&self, channel_id: i32) {
        if let Err(e) = self.admission.release(channel_id).await {
            lwarn!(
                "system",
                LogStage::Admission,
                LogComponent::Worker,
                "release_failed",
                "准入槽位释放失败",
                channel_id = channel_id,
                error = %e
            );
        }
    }

    /// 落库 + 发布进度 + 队列记账。
    /// 持久化失败时任务按失败记账，进度事件尽力发布（FAIL）。
    async fn finish_job(&self, job: &ProbeJob, outcome: ProbeOutcome) {
        let persisted = self.repository.persist_probe_outcome(job, &outcome).await;
        let (publish_status, job_success) = match &persisted {
            Ok(_) => (outcome.status, outcome.status.is_success()),
            Err(e) => {
                lerror!(
                    &job.job_id,
                    LogStage::Persist,
                    LogComponent::Worker,
                    "persist_failed",
                    "探测结果落库失败",
                    model_id = job.model_id,
                    error = %e
                );
                (ProbeStatus::Fail, false)
            }
        };

        let is_model_complete = match self
            .queue
            .has_pending_for_model(job.model_id, &job.job_id)
            .await
        {
            Ok(has_pending) => !has_pending,
            Err(_) => false,
        };

        self.bus
            .publish(ProgressEvent {
                channel_id: job.channel_id,
                model_id: job.model_id,
                model_name: job.model_name.clone(),
                endpoint_kind: job.endpoint_kind,
                status: publish_status,
                latency_ms: outcome.latency_ms,
                timestamp: Utc::now(),
                is_model_complete,
                source_id: String::new(),
            })
            .await;

        if let Err(e) = self.queue.mark_done(&job.job_id, job_success).await {
            lwarn!(
                &job.job_id,
                LogStage::Internal,
                LogComponent::Worker,
                "mark_done_failed",
                "任务状态回写失败",
                error = %e
            );
        }
    }

    /// 为被 `stop_and_drain` 撤下的任务补写取消结果（不经过准入与抖动）
    pub async fn record_drained_jobs(&self, jobs: &[ProbeJob]) {
        for job in jobs {
            let outcome = ProbeOutcome::canceled(job.endpoint_kind);
            let _ = self.repository.persist_probe_outcome(job, &outcome).await;
            let is_model_complete = match self
                .queue
                .has_pending_for_model(job.model_id, &job.job_id)
                .await
            {
                Ok(has_pending) => !has_pending,
                Err(_) => true,
            };
            self.bus
                .publish(ProgressEvent {
                    channel_id: job.channel_id,
                    model_id: job.model_id,
                    model_name: job.model_name.clone(),
                    endpoint_kind: job.endpoint_kind,
                    status: ProbeStatus::Fail,
                    latency_ms: 0,
                    timestamp: Utc::now(),
                    is_model_complete,
                    source_id: String::new(),
                })
                .await;
        }
    }
}
