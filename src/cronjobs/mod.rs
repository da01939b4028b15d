//! # 定时调度
//!
//! 两个具名定时任务：周期检测与日志保留清理。表达式为经典五字段 cron，
//! 时区取自调度配置；每次触发前重新读取配置，后台改动下个周期即生效。
//! start 幂等，重复调用不会产生第二个 ticker。

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::detection::DetectionService;
use crate::error::{ProbeError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::repository::{ProbeRepository, SchedulerSettings};
use crate::{ldebug, lerror, linfo, lwarn};

/// 清理任务默认排程：每天 02:00
pub const DEFAULT_CLEANUP_CRON: &str = "0 2 * * *";

/// 定时任务名
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronTask {
    Detection,
    Cleanup,
}

impl CronTask {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Detection => "detection",
            Self::Cleanup => "cleanup",
        }
    }
}

/// 检测任务状态
#[derive(Debug, Clone, Serialize)]
pub struct DetectionTaskStatus {
    pub enabled: bool,
    pub running: bool,
    pub schedule: String,
    pub next_run: Option<DateTime<Utc>>,
}

/// 清理任务状态
#[derive(Debug, Clone, Serialize)]
pub struct CleanupTaskStatus {
    pub running: bool,
    pub schedule: String,
    pub next_run: Option<DateTime<Utc>>,
    pub retention_days: u32,
}

/// 并发配置视图
#[derive(Debug, Clone, Serialize)]
pub struct ConcurrencyStatus {
    pub channel_concurrency: u32,
    pub max_global_concurrency: u32,
    pub min_jitter_ms: u64,
    pub max_jitter_ms: u64,
}

/// 调度器状态总览
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub detection: DetectionTaskStatus,
    pub cleanup: CleanupTaskStatus,
    pub config: ConcurrencyStatus,
}

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RunningTask {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

#[derive(Default)]
struct SchedulerState {
    detection: Option<RunningTask>,
    cleanup: Option<RunningTask>,
}

/// 定时调度器
pub struct CronScheduler {
    repository: Arc<dyn ProbeRepository>,
    detection: Arc<DetectionService>,
    state: tokio::sync::Mutex<SchedulerState>,
}

impl CronScheduler {
    #[must_use]
    pub fn new(repository: Arc<dyn ProbeRepository>, detection: Arc<DetectionService>) -> Self {
        Self {
            repository,
            detection,
            state: tokio::sync::Mutex::new(SchedulerState::default()),
        }
    }

    /// 解析五字段 cron（内部补秒字段）
    pub fn parse_schedule(expression: &str) -> Result<Schedule> {
        let with_seconds = format!("0 {}", expression.trim());
        Schedule::from_str(&with_seconds)
            .map_err(|e| ProbeError::config_with_source(format!("cron 表达式非法: {expression}"), e))
    }

    fn parse_timezone(timezone: &str) -> Tz {
        Tz::from_str(timezone).unwrap_or(chrono_tz::UTC)
    }

    /// 下一次触发时间（UTC）
    pub fn next_run(expression: &str, timezone: &str) -> Option<DateTime<Utc>> {
        let schedule = Self::parse_schedule(expression).ok()?;
        let tz = Self::parse_timezone(timezone);
        schedule
            .upcoming(tz)
            .next()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// 启动两个定时任务
    pub async fn start_all(&self) -> Result<()> {
        self.start_detection().await?;
        self.start_cleanup().await?;
        Ok(())
    }

    /// 停止两个定时任务
    pub async fn stop_all(&self) {
        self.stop_task(CronTask::Detection).await;
        self.stop_task(CronTask::Cleanup).await;
    }

    /// 启动周期检测任务（幂等）
    pub async fn start_detection(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.detection.as_ref().is_some_and(RunningTask::is_running) {
            return Ok(());
        }

        // 启动时先校验表达式，非法配置同步报错
        let settings = self.repository.load_scheduler_config().await?;
        Self::parse_schedule(&settings.cron_expression)?;

        let cancel = CancellationToken::new();
        let repository = Arc::clone(&self.repository);
        let detection = Arc::clone(&self.detection);
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            detection_loop(repository, detection, task_cancel).await;
        });

        state.detection = Some(RunningTask { cancel, handle });
        linfo!(
            "system",
            LogStage::Scheduling,
            LogComponent::CronScheduler,
            "detection_task_started",
            "周期检测任务已启动",
            schedule = %settings.cron_expression
        );
        Ok(())
    }

    /// 启动日志清理任务（幂等）
    pub async fn start_cleanup(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.cleanup.as_ref().is_some_and(RunningTask::is_running) {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let repository = Arc::clone(&self.repository);
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            cleanup_loop(repository, task_cancel).await;
        });

        state.cleanup = Some(RunningTask { cancel, handle });
        linfo!(
            "system",
            LogStage::Scheduling,
            LogComponent::CronScheduler,
            "cleanup_task_started",
            "日志清理任务已启动",
            schedule = DEFAULT_CLEANUP_CRON
        );
        Ok(())
    }

    /// 停止指定任务
    pub async fn stop_task(&self, task: CronTask) {
        let mut state = self.state.lock().await;
        let slot = match task {
            CronTask::Detection => &mut state.detection,
            CronTask::Cleanup => &mut state.cleanup,
        };
        if let Some(running) = slot.take() {
            running.cancel.cancel();
            let _ = running.handle.await;
            linfo!(
                "system",
                LogStage::Shutdown,
                LogComponent::CronScheduler,
                "cron_task_stopped",
                "定时任务已停止",
                task = task.as_str()
            );
        }
    }

    /// 立即执行一次日志清理，返回删除行数
    pub async fn cleanup_now(&self) -> Result<u64> {
        let settings = self.repository.load_scheduler_config().await?;
        run_cleanup(self.repository.as_ref(), &settings).await
    }

    /// 调度器状态总览
    pub async fn status(&self) -> Result<SchedulerStatus> {
        let settings = self.repository.load_scheduler_config().await?;
        let state = self.state.lock().await;

        let detection_running = state
            .detection
            .as_ref()
            .is_some_and(RunningTask::is_running);
        let cleanup_running = state.cleanup.as_ref().is_some_and(RunningTask::is_running);

        Ok(SchedulerStatus {
            detection: DetectionTaskStatus {
                enabled: settings.enabled,
                running: detection_running,
                schedule: settings.cron_expression.clone(),
                next_run: Self::next_run(&settings.cron_expression, &settings.timezone),
            },
            cleanup: CleanupTaskStatus {
                running: cleanup_running,
                schedule: DEFAULT_CLEANUP_CRON.to_string(),
                next_run: Self::next_run(DEFAULT_CLEANUP_CRON, &settings.timezone),
                retention_days: settings.log_retention_days,
            },
            config: ConcurrencyStatus {
                channel_concurrency: settings.channel_concurrency,
                max_global_concurrency: settings.max_global_concurrency,
                min_jitter_ms: settings.min_jitter_ms,
                max_jitter_ms: settings.max_jitter_ms,
            },
        })
    }
}

/// 等到下一个触发点；返回 false 表示任务被取消
async fn sleep_until_next(
    expression: &str,
    timezone: &str,
    cancel: &CancellationToken,
) -> bool {
    let Some(next) = CronScheduler::next_run(expression, timezone) else {
        // 表达式解析失败时退避一分钟再试，避免空转
        lwarn!(
            "system",
            LogStage::Scheduling,
            LogComponent::CronScheduler,
            "schedule_parse_failed",
            "排程不可用，一分钟后重试",
            expression = %expression
        );
        return tokio::select! {
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(std::time::Duration::from_secs(60)) => true,
        };
    };

    let wait = (next - Utc::now())
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(0));
    ldebug!(
        "system",
        LogStage::Scheduling,
        LogComponent::CronScheduler,
        "next_fire",
        "等待下一次触发",
        next_run = %next,
        wait_secs = wait.as_secs()
    );
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(wait) => true,
    }
}

async fn detection_loop(
    repository: Arc<dyn ProbeRepository>,
    detection: Arc<DetectionService>,
    cancel: CancellationToken,
) {
    loop {
        // 每个周期都重读配置，表达式与选择范围热更新
        let settings = match repository.load_scheduler_config().await {
            Ok(settings) => settings,
            Err(e) => {
                lerror!(
                    "system",
                    LogStage::Db,
                    LogComponent::CronScheduler,
                    "config_load_failed",
                    "调度配置读取失败",
                    error = %e
                );
                SchedulerSettings::default()
            }
        };

        if !sleep_until_next(&settings.cron_expression, &settings.timezone, &cancel).await {
            break;
        }

        // 触发前再读一次，拿到等待期间的修改
        let settings = match repository.load_scheduler_config().await {
            Ok(settings) => settings,
            Err(_) => continue,
        };
        if !settings.enabled {
            continue;
        }

        let fired = if settings.detect_all_channels {
            detection.trigger_full(true).await
        } else {
            detection
                .trigger_selective(
                    settings.selected_channel_ids.as_deref(),
                    settings.selected_model_ids.as_ref(),
                )
                .await
        };

        match fired {
            Ok(result) => {
                linfo!(
                    "system",
                    LogStage::Scheduling,
                    LogComponent::CronScheduler,
                    "detection_fired",
                    "周期检测已触发",
                    channels = result.channels,
                    models = result.model_count,
                    jobs = result.job_ids.len()
                );
            }
            Err(e) => {
                lerror!(
                    "system",
                    LogStage::Scheduling,
                    LogComponent::CronScheduler,
                    "detection_fire_failed",
                    "周期检测触发失败",
                    error = %e
                );
            }
        }
    }
}

async fn cleanup_loop(repository: Arc<dyn ProbeRepository>, cancel: CancellationToken) {
    loop {
        let timezone = repository
            .load_scheduler_config()
            .await
            .map(|s| s.timezone)
            .unwrap_or_else(|_| "UTC".to_string());

        if !sleep_until_next(DEFAULT_CLEANUP_CRON, &timezone, &cancel).await {
            break;
        }

        let settings = match repository.load_scheduler_config().await {
            Ok(settings) => settings,
            Err(_) => continue,
        };
        if let Err(e) = run_cleanup(repository.as_ref(), &settings).await {
            lerror!(
                "system",
                LogStage::Cleanup,
                LogComponent::CronScheduler,
                "cleanup_failed",
                "日志清理失败",
                error = %e
            );
        }
    }
}

async fn run_cleanup(
    repository: &dyn ProbeRepository,
    settings: &SchedulerSettings,
) -> Result<u64> {
    let retention_days = i64::from(settings.log_retention_days.max(1));
    let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).naive_utc();
    let deleted = repository.purge_check_logs_older_than(cutoff).await?;
    linfo!(
        "system",
        LogStage::Cleanup,
        LogComponent::CronScheduler,
        "cleanup_done",
        "日志清理完成",
        deleted = deleted,
        retention_days = retention_days
    );
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_five_field_cron() {
        assert!(CronScheduler::parse_schedule("0 */6 * * *").is_ok());
        assert!(CronScheduler::parse_schedule("30 3 * * 1-5").is_ok());
        assert!(CronScheduler::parse_schedule("not a cron").is_err());
        assert!(CronScheduler::parse_schedule("99 99 * * *").is_err());
    }

    #[test]
    fn test_next_run_present() {
        let next = CronScheduler::next_run("0 */6 * * *", "UTC");
        assert!(next.is_some());
        assert!(next.unwrap() > Utc::now());

        // 非法时区回退 UTC，依然可计算
        let next = CronScheduler::next_run("0 2 * * *", "Not/AZone");
        assert!(next.is_some());
    }

    #[test]
    fn test_cleanup_default_schedule_parses() {
        assert!(CronScheduler::parse_schedule(DEFAULT_CLEANUP_CRON).is_ok());
    }
}
