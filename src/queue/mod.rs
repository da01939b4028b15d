//! # 探测任务队列
//!
//! 可互换的两种后端：进程内 FIFO 与 Redis broker。
//! 队列同时承载“停止检测”标志（带 TTL），worker 与触发入口共享该标志。

mod broker;
mod memory;

pub use broker::RedisProbeQueue;
pub use memory::MemoryProbeQueue;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::error::Result;
use crate::probe::ProbeJob;

/// 停止标志存活时间
pub const STOP_FLAG_TTL: Duration = Duration::from_secs(300);

/// broker 模式下单任务最大尝试次数
pub const MAX_JOB_ATTEMPTS: u32 = 3;

/// broker 模式下重试退避的基础间隔
pub const RETRY_BACKOFF_BASE: Duration = Duration::from_secs(5);

/// 队列统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

impl QueueStats {
    /// 本轮批次的任务总数
    #[must_use]
    pub fn total(&self) -> u64 {
        self.waiting + self.active + self.completed + self.failed + self.delayed
    }

    /// 是否仍有待处理或在途任务
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.waiting + self.active + self.delayed > 0
    }

    /// 完成百分比（0-100）
    #[must_use]
    pub fn progress_percent(&self) -> u8 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        let done = self.completed + self.failed;
        u8::try_from(done * 100 / total).unwrap_or(100)
    }
}

/// `stop_and_drain` 的结果
#[derive(Debug, Clone, Default)]
pub struct DrainedBatch {
    /// 被清理的任务数（等待 + 延迟 + 在途）
    pub cleared: u64,
    /// 从等待/延迟集合撤下的任务；调用方负责按取消结果落库并发布进度
    pub jobs: Vec<ProbeJob>,
}

/// 探测任务队列抽象
#[async_trait]
pub trait ProbeQueue: Send + Sync {
    /// 入队单个任务
    async fn enqueue(&self, job: ProbeJob) -> Result<()>;

    /// 批量入队（同批任务一次放入，全部可见或全部不可见）
    async fn enqueue_bulk(&self, jobs: Vec<ProbeJob>) -> Result<()>;

    /// 当前统计
    async fn stats(&self) -> Result<QueueStats>;

    /// 排队中/执行中/延迟重试中的模型 ID 集合
    async fn testing_model_ids(&self) -> Result<HashSet<i32>>;

    /// 排队中/执行中/延迟重试中的渠道 ID 集合
    async fn testing_channel_ids(&self) -> Result<HashSet<i32>>;

    /// 停止检测：设置停止标志、清空等待队列、将在途任务转入失败；
    /// 返回被清理的任务数与撤下的任务
    async fn stop_and_drain(&self) -> Result<DrainedBatch>;

    /// 停止标志是否生效（超过 TTL 自动失效）
    async fn stopped_flag(&self) -> bool;

    /// 清除停止标志（新一轮触发前调用）
    async fn clear_stopped_flag(&self) -> Result<()>;

    /// 拉取下一个任务（非阻塞；`can_take` 返回 false 的任务留在原位）
    async fn pull_next(
        &self,
        can_take: &(dyn for<'a> Fn(&'a ProbeJob) -> bool + Send + Sync),
    ) -> Result<Option<ProbeJob>>;

    /// 标记任务完成（broker 模式下失败任务按退避策略重试）
    async fn mark_done(&self, job_id: &str, success: bool) -> Result<()>;

    /// 指定模型是否还有其他未完成任务
    async fn has_pending_for_model(&self, model_id: i32, exclude_job_id: &str) -> Result<bool>;
}

/// 失败任务的重试退避：5s、10s、20s…
#[must_use]
pub fn retry_backoff(attempt: u32) -> Duration {
    RETRY_BACKOFF_BASE * 2_u32.saturating_pow(attempt.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_progress() {
        let stats = QueueStats {
            waiting: 2,
            active: 1,
            completed: 6,
            failed: 1,
            delayed: 0,
        };
        assert_eq!(stats.total(), 10);
        assert!(stats.is_running());
        assert_eq!(stats.progress_percent(), 70);

        let empty = QueueStats::default();
        assert!(!empty.is_running());
        assert_eq!(empty.progress_percent(), 0);
    }

    #[test]
    fn test_retry_backoff_sequence() {
        assert_eq!(retry_backoff(1), Duration::from_secs(5));
        assert_eq!(retry_backoff(2), Duration::from_secs(10));
        assert_eq!(retry_backoff(3), Duration::from_secs(20));
    }
}
