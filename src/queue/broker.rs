//! # Redis broker 队列后端
//!
//! 配置 `BROKER_URL` 时使用，多进程共享。任务最多投递三次，失败后按
//! 5s 起步的指数退避进入延迟集合；completed/failed 历史按条数与时长双重
//! 截断。停止标志是带 `EX 300` 的键，跨进程可见。

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{retry_backoff, DrainedBatch, ProbeQueue, QueueStats, MAX_JOB_ATTEMPTS, STOP_FLAG_TTL};
use crate::error::{ProbeError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::probe::{ProbeJob, CANCEL_ERROR_MSG};
use crate::{ldebug, linfo, lwarn};

const KEY_WAITING: &str = "probe:queue:waiting";
const KEY_ACTIVE: &str = "probe:queue:active";
const KEY_DELAYED: &str = "probe:queue:delayed";
const KEY_COMPLETED: &str = "probe:queue:completed";
const KEY_FAILED: &str = "probe:queue:failed";
const KEY_STOPPED: &str = "probe:queue:stopped";
const ADMISSION_KEY_PATTERN: &str = "probe:admission:*";

/// completed 历史上限：1000 条或 1 小时
const COMPLETED_CAP: isize = 1000;
const COMPLETED_WINDOW_MS: i64 = 60 * 60 * 1000;

/// failed 历史上限：500 条或 24 小时
const FAILED_CAP: isize = 500;
const FAILED_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// 队列中流转的任务信封（附带投递次数）
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueuedEnvelope {
    job: ProbeJob,
    attempt: u32,
}

/// Redis 探测队列
pub struct RedisProbeQueue {
    conn: ConnectionManager,
}

impl RedisProbeQueue {
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn encode(envelope: &QueuedEnvelope) -> Result<String> {
        serde_json::to_string(envelope)
            .map_err(|e| ProbeError::queue_with_source("任务序列化失败", e))
    }

    fn decode(raw: &str) -> Result<QueuedEnvelope> {
        serde_json::from_str(raw).map_err(|e| ProbeError::queue_with_source("任务反序列化失败", e))
    }

    /// 把到期的延迟任务搬回等待队列头部
    async fn promote_due_delayed(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let now_ms = Utc::now().timestamp_millis();
        let due: Vec<String> = conn.zrangebyscore(KEY_DELAYED, 0, now_ms).await?;
        for raw in due {
            let removed: i64 = conn.zrem(KEY_DELAYED, &raw).await?;
            if removed > 0 {
                // 过期重试优先于新任务
                let _: i64 = conn.lpush(KEY_WAITING, &raw).await?;
            }
        }
        Ok(())
    }

    /// 历史集合的条数与时长双重截断
    async fn trim_history(&self, key: &str, cap: isize, window_ms: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        let cutoff = Utc::now().timestamp_millis() - window_ms;
        let _: i64 = conn.zrembyscore(key, 0, cutoff).await?;
        let _: i64 = conn.zremrangebyrank(key, 0, -(cap + 1)).await?;
        Ok(())
    }

    async fn collect_envelopes(&self) -> Result<Vec<QueuedEnvelope>> {
        let mut conn = self.conn.clone();
        let mut envelopes = Vec::new();

        let waiting: Vec<String> = conn.lrange(KEY_WAITING, 0, -1).await?;
        for raw in &waiting {
            envelopes.push(Self::decode(raw)?);
        }
        let active: Vec<String> = conn.hvals(KEY_ACTIVE).await?;
        for raw in &active {
            envelopes.push(Self::decode(raw)?);
        }
        let delayed: Vec<String> = conn.zrange(KEY_DELAYED, 0, -1).await?;
        for raw in &delayed {
            envelopes.push(Self::decode(raw)?);
        }
        Ok(envelopes)
    }
}

#[async_trait]
impl ProbeQueue for RedisProbeQueue {
    async fn enqueue(&self, job: ProbeJob) -> Result<()> {
        let mut conn = self.conn.clone();
        let raw = Self::encode(&QueuedEnvelope { job, attempt: 0 })?;
        let _: i64 = conn.rpush(KEY_WAITING, raw).await?;
        Ok(())
    }

    async fn enqueue_bulk(&self, jobs: Vec<ProbeJob>) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut payloads = Vec::with_capacity(jobs.len());
        for job in jobs {
            payloads.push(Self::encode(&QueuedEnvelope { job, attempt: 0 })?);
        }
        let count = payloads.len();
        // 单条 RPUSH 命令保证同批任务一次性可见
        let _: i64 = conn.rpush(KEY_WAITING, payloads).await?;
        ldebug!(
            "system",
            LogStage::Enqueue,
            LogComponent::Queue,
            "enqueue_bulk",
            "批量入队完成",
            count = count
        );
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut conn = self.conn.clone();
        let waiting: u64 = conn.llen(KEY_WAITING).await?;
        let active: u64 = conn.hlen(KEY_ACTIVE).await?;
        let delayed: u64 = conn.zcard(KEY_DELAYED).await?;
        let completed: u64 = conn.zcard(KEY_COMPLETED).await?;
        let failed: u64 = conn.zcard(KEY_FAILED).await?;
        Ok(QueueStats {
            waiting,
            active,
            completed,
            failed,
            delayed,
        })
    }

    async fn testing_model_ids(&self) -> Result<HashSet<i32>> {
        Ok(self
            .collect_envelopes()
            .await?
            .iter()
            .map(|e| e.job.model_id)
            .collect())
    }

    async fn testing_channel_ids(&self) -> Result<HashSet<i32>> {
        Ok(self
            .collect_envelopes()
            .await?
            .iter()
            .map(|e| e.job.channel_id)
            .collect())
    }

    async fn stop_and_drain(&self) -> Result<DrainedBatch> {
        let mut conn = self.conn.clone();
        let now_ms = Utc::now().timestamp_millis();

        // 先立旗：所有 worker 在下一个检查点短路
        let _: () = conn
            .set_ex(KEY_STOPPED, 1, STOP_FLAG_TTL.as_secs())
            .await?;

        // 在途任务全部按“用户停止”记入失败历史
        let active: Vec<String> = conn.hvals(KEY_ACTIVE).await?;
        let mut drained_active = 0_u64;
        for raw in &active {
            if let Ok(envelope) = Self::decode(raw) {
                let _: i64 = conn.zadd(KEY_FAILED, envelope.job.job_id, now_ms).await?;
                drained_active += 1;
            }
        }
        let _: i64 = conn.del(KEY_ACTIVE).await?;

        // 等待与延迟集合里的任务撤下后由调用方统一落库
        let mut jobs = Vec::new();
        let waiting_raw: Vec<String> = conn.lrange(KEY_WAITING, 0, -1).await?;
        let delayed_raw: Vec<String> = conn.zrange(KEY_DELAYED, 0, -1).await?;
        for raw in waiting_raw.iter().chain(delayed_raw.iter()) {
            if let Ok(envelope) = Self::decode(raw) {
                let _: i64 = conn
                    .zadd(KEY_FAILED, envelope.job.job_id.clone(), now_ms)
                    .await?;
                jobs.push(envelope.job);
            }
        }
        let waiting = waiting_raw.len() as u64;
        let delayed = delayed_raw.len() as u64;
        let _: i64 = conn.del(KEY_WAITING).await?;
        let _: i64 = conn.del(KEY_DELAYED).await?;

        // 清掉准入计数器，避免崩溃残留把后续批次卡死
        let admission_keys: Vec<String> = redis::cmd("KEYS")
            .arg(ADMISSION_KEY_PATTERN)
            .query_async(&mut conn)
            .await?;
        if !admission_keys.is_empty() {
            let _: i64 = conn.del(admission_keys).await?;
        }

        self.trim_history(KEY_FAILED, FAILED_CAP, FAILED_WINDOW_MS)
            .await?;

        let cleared = waiting + delayed + drained_active;
        linfo!(
            "system",
            LogStage::Detection,
            LogComponent::Queue,
            "stop_and_drain",
            "检测已停止，队列已清空",
            cleared = cleared,
            reason = CANCEL_ERROR_MSG
        );
        Ok(DrainedBatch { cleared, jobs })
    }

    async fn stopped_flag(&self) -> bool {
        let mut conn = self.conn.clone();
        match conn.exists::<_, bool>(KEY_STOPPED).await {
            Ok(exists) => exists,
            Err(e) => {
                lwarn!(
                    "system",
                    LogStage::Cache,
                    LogComponent::Queue,
                    "stopped_flag_read_failed",
                    "停止标志读取失败，按未停止处理",
                    error = %e
                );
                false
            }
        }
    }

    async fn clear_stopped_flag(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(KEY_STOPPED).await?;
        Ok(())
    }

    async fn pull_next(
        &self,
        can_take: &(dyn for<'a> Fn(&'a ProbeJob) -> bool + Send + Sync),
    ) -> Result<Option<ProbeJob>> {
        self.promote_due_delayed().await?;

        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.lpop(KEY_WAITING, None).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let envelope = Self::decode(&raw)?;
        if !can_take(&envelope.job) {
            // 放回队头，留给能接的 worker
            let _: i64 = conn.lpush(KEY_WAITING, &raw).await?;
            return Ok(None);
        }
        let _: i64 = conn
            .hset(KEY_ACTIVE, envelope.job.job_id.clone(), &raw)
            .await?;
        Ok(Some(envelope.job))
    }

    async fn mark_done(&self, job_id: &str, success: bool) -> Result<()> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(KEY_ACTIVE, job_id).await?;
        let _: i64 = conn.hdel(KEY_ACTIVE, job_id).await?;
        let now_ms = Utc::now().timestamp_millis();

        if success {
            let _: i64 = conn.zadd(KEY_COMPLETED, job_id, now_ms).await?;
            self.trim_history(KEY_COMPLETED, COMPLETED_CAP, COMPLETED_WINDOW_MS)
                .await?;
            return Ok(());
        }

        // 停止期间的失败不再重试
        let stopped = self.stopped_flag().await;
        let envelope = raw.as_deref().map(Self::decode).transpose()?;
        match envelope {
            Some(mut envelope) if !stopped => {
                envelope.attempt += 1;
                if envelope.attempt < MAX_JOB_ATTEMPTS {
                    let due_ms = now_ms + retry_backoff(envelope.attempt).as_millis() as i64;
                    let raw = Self::encode(&envelope)?;
                    let _: i64 = conn.zadd(KEY_DELAYED, raw, due_ms).await?;
                    ldebug!(
                        job_id,
                        LogStage::Enqueue,
                        LogComponent::Queue,
                        "job_retry_scheduled",
                        "任务失败，进入延迟重试",
                        attempt = envelope.attempt
                    );
                    return Ok(());
                }
                let _: i64 = conn.zadd(KEY_FAILED, job_id, now_ms).await?;
            }
            _ => {
                let _: i64 = conn.zadd(KEY_FAILED, job_id, now_ms).await?;
            }
        }
        self.trim_history(KEY_FAILED, FAILED_CAP, FAILED_WINDOW_MS)
            .await?;
        Ok(())
    }

    async fn has_pending_for_model(&self, model_id: i32, exclude_job_id: &str) -> Result<bool> {
        Ok(self.collect_envelopes().await?.iter().any(|e| {
            e.job.model_id == model_id && e.job.job_id != exclude_job_id
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::EndpointKind;

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = QueuedEnvelope {
            job: ProbeJob {
                job_id: "1-2-chat-1700000000000".to_string(),
                channel_id: 1,
                model_id: 2,
                model_name: "gpt-4".to_string(),
                endpoint_kind: EndpointKind::Chat,
                base_url: "https://api.example.test".to_string(),
                api_key: "sk-test".to_string(),
                proxy_url: Some("socks5://127.0.0.1:1080".to_string()),
            },
            attempt: 2,
        };
        let raw = RedisProbeQueue::encode(&envelope).unwrap();
        let parsed = RedisProbeQueue::decode(&raw).unwrap();
        assert_eq!(parsed.attempt, 2);
        assert_eq!(parsed.job, envelope.job);
    }
}
