//! # Redis 准入后端
//!
//! INCR/DECR 计数器 + 120 秒 TTL（worker 崩溃后自动回收），竞争时每
//! 500ms 轮询一次。释放后计数 ≤0 时直接删除键，防止 stop_and_drain
//! 之后的残值把后续批次卡死。

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::{AcquireOutcome, AdmissionController, AdmissionLimits, AdmissionSnapshot};
use crate::error::Result;

const GLOBAL_KEY: &str = "probe:admission:global";
const COUNTER_TTL_SECS: i64 = 120;
const CONTENTION_POLL: Duration = Duration::from_millis(500);

fn channel_key(channel_id: i32) -> String {
    format!("probe:admission:channel:{channel_id}")
}

/// Redis 准入控制器
pub struct RedisAdmission {
    conn: ConnectionManager,
    limits: RwLock<AdmissionLimits>,
}

impl RedisAdmission {
    #[must_use]
    pub fn new(conn: ConnectionManager, limits: AdmissionLimits) -> Self {
        Self {
            conn,
            limits: RwLock::new(limits),
        }
    }

    /// INCR 并续 TTL，返回新值
    async fn bump(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1).await?;
        let _: bool = conn.expire(key, COUNTER_TTL_SECS).await?;
        Ok(value)
    }

    /// DECR；观察到 ≤0 时删除键
    async fn drop_slot(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.decr(key, 1).await?;
        if value <= 0 {
            let _: i64 = conn.del(key).await?;
        }
        Ok(())
    }

    /// 单次尝试：先全局后渠道，渠道竞争时退还全局
    async fn try_take(&self, channel_id: i32) -> Result<bool> {
        let limits = *self.limits.read().await;

        let global = self.bump(GLOBAL_KEY).await?;
        if global > i64::from(limits.max_global) {
            self.drop_slot(GLOBAL_KEY).await?;
            return Ok(false);
        }

        let channel = self.bump(&channel_key(channel_id)).await?;
        if channel > i64::from(limits.per_channel) {
            self.drop_slot(&channel_key(channel_id)).await?;
            self.drop_slot(GLOBAL_KEY).await?;
            return Ok(false);
        }

        Ok(true)
    }
}

#[async_trait]
impl AdmissionController for RedisAdmission {
    async fn acquire(
        &self,
        channel_id: i32,
        cancel: &CancellationToken,
    ) -> Result<AcquireOutcome> {
        loop {
            if cancel.is_cancelled() {
                return Ok(AcquireOutcome::Stopped);
            }
            if self.try_take(channel_id).await? {
                return Ok(AcquireOutcome::Acquired);
            }
            tokio::select! {
                () = cancel.cancelled() => return Ok(AcquireOutcome::Stopped),
                () = tokio::time::sleep(CONTENTION_POLL) => {}
            }
        }
    }

    async fn release(&self, channel_id: i32) -> Result<()> {
        self.drop_slot(&channel_key(channel_id)).await?;
        self.drop_slot(GLOBAL_KEY).await?;
        Ok(())
    }

    async fn set_limits(&self, limits: AdmissionLimits) {
        *self.limits.write().await = limits;
    }

    async fn reset_all(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg("probe:admission:*")
            .query_async(&mut conn)
            .await?;
        if !keys.is_empty() {
            let _: i64 = conn.del(keys).await?;
        }
        Ok(())
    }

    async fn snapshot(&self) -> Result<AdmissionSnapshot> {
        let mut conn = self.conn.clone();
        let global_in_use: Option<i64> = conn.get(GLOBAL_KEY).await?;
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg("probe:admission:channel:*")
            .query_async(&mut conn)
            .await?;
        let mut channel_in_use = Vec::with_capacity(keys.len());
        for key in keys {
            let count: Option<i64> = conn.get(&key).await?;
            let channel_id: i32 = key
                .rsplit(':')
                .next()
                .and_then(|s| s.parse().ok())
                .unwrap_or(-1);
            channel_in_use.push((
                channel_id,
                u32::try_from(count.unwrap_or(0).max(0)).unwrap_or(0),
            ));
        }
        channel_in_use.sort_unstable();
        Ok(AdmissionSnapshot {
            global_in_use: u32::try_from(global_in_use.unwrap_or(0).max(0)).unwrap_or(0),
            channel_in_use,
        })
    }
}
