//! # 准入控制器
//!
//! 两级并发闸门：全局槽位 + 渠道槽位，两者都拿到才允许探测。
//! 获取顺序固定为先全局后渠道，渠道竞争时退还全局槽位再重试，
//! 避免渠道等待者占满全局槽位造成僵死。

mod broker;
mod memory;

pub use broker::RedisAdmission;
pub use memory::MemoryAdmission;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// 获取槽位的结果
#[derive(Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// 两级槽位均已持有
    Acquired,
    /// 等待期间观察到停止信号
    Stopped,
}

/// 准入并发上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionLimits {
    pub max_global: u32,
    pub per_channel: u32,
}

impl AdmissionLimits {
    #[must_use]
    pub fn new(max_global: u32, per_channel: u32) -> Self {
        let per_channel = per_channel.max(1);
        Self {
            max_global: max_global.max(per_channel),
            per_channel,
        }
    }
}

/// 在用槽位快照（诊断与测试用）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmissionSnapshot {
    pub global_in_use: u32,
    pub channel_in_use: Vec<(i32, u32)>,
}

/// 准入控制器抽象
#[async_trait]
pub trait AdmissionController: Send + Sync {
    /// 阻塞获取全局 + 渠道槽位；`cancel` 触发时返回 `Stopped`
    async fn acquire(&self, channel_id: i32, cancel: &CancellationToken)
        -> Result<AcquireOutcome>;

    /// 释放此前获取的两级槽位
    async fn release(&self, channel_id: i32) -> Result<()>;

    /// 更新并发上限（worker 配置刷新时调用）
    async fn set_limits(&self, limits: AdmissionLimits);

    /// 清零所有计数（stop_and_drain 之后的兜底）
    async fn reset_all(&self) -> Result<()>;

    /// 当前占用快照
    async fn snapshot(&self) -> Result<AdmissionSnapshot>;
}
