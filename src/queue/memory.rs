//! # 进程内队列后端
//!
//! 未配置 `BROKER_URL` 时使用。FIFO 列表 + 在途表，完成计数在队列闲置后的
//! 下一次入队时归零。进程退出即丢失在途任务。

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;
use tokio::sync::Mutex;

use super::{DrainedBatch, ProbeQueue, QueueStats, STOP_FLAG_TTL};
use crate::error::Result;
use crate::logging::{LogComponent, LogStage};
use crate::probe::ProbeJob;
use crate::{ldebug, linfo};

struct MemoryState {
    waiting: VecDeque<ProbeJob>,
    active: HashMap<String, ProbeJob>,
    completed: u64,
    failed: u64,
    stopped_at: Option<Instant>,
}

impl MemoryState {
    fn idle(&self) -> bool {
        self.waiting.is_empty() && self.active.is_empty()
    }

    /// 队列闲置后再入队时，上一批的完成计数归零
    fn reset_counters_if_idle(&mut self) {
        if self.idle() {
            self.completed = 0;
            self.failed = 0;
        }
    }
}

/// 进程内探测队列
pub struct MemoryProbeQueue {
    state: Mutex<MemoryState>,
}

impl MemoryProbeQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                waiting: VecDeque::new(),
                active: HashMap::new(),
                completed: 0,
                failed: 0,
                stopped_at: None,
            }),
        }
    }
}

impl Default for MemoryProbeQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeQueue for MemoryProbeQueue {
    async fn enqueue(&self, job: ProbeJob) -> Result<()> {
        let mut state = self.state.lock().await;
        state.reset_counters_if_idle();
        state.waiting.push_back(job);
        Ok(())
    }

    async fn enqueue_bulk(&self, jobs: Vec<ProbeJob>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.reset_counters_if_idle();
        let count = jobs.len();
        state.waiting.extend(jobs);
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
        let state = self.state.lock().await;
        Ok(QueueStats {
            waiting: state.waiting.len() as u64,
            active: state.active.len() as u64,
            completed: state.completed,
            failed: state.failed,
            delayed: 0,
        })
    }

    async fn testing_model_ids(&self) -> Result<HashSet<i32>> {
        let state = self.state.lock().await;
        let mut ids: HashSet<i32> = state.waiting.iter().map(|j| j.model_id).collect();
        ids.extend(state.active.values().map(|j| j.model_id));
        Ok(ids)
    }

    async fn testing_channel_ids(&self) -> Result<HashSet<i32>> {
        let state = self.state.lock().await;
        let mut ids: HashSet<i32> = state.waiting.iter().map(|j| j.channel_id).collect();
        ids.extend(state.active.values().map(|j| j.channel_id));
        Ok(ids)
    }

    async fn stop_and_drain(&self) -> Result<DrainedBatch> {
        let mut state = self.state.lock().await;
        state.stopped_at = Some(Instant::now());
        let jobs: Vec<ProbeJob> = state.waiting.drain(..).collect();
        // 撤下的任务按失败记账，进度口径与 broker 模式一致
        state.failed += jobs.len() as u64;
        let cleared = jobs.len() as u64;
        linfo!(
            "system",
            LogStage::Detection,
            LogComponent::Queue,
            "stop_and_drain",
            "检测已停止，等待队列已清空",
            cleared = cleared,
            active = state.active.len()
        );
        // 在途任务会在下一个检查点观察到停止标志
        Ok(DrainedBatch { cleared, jobs })
    }

    async fn stopped_flag(&self) -> bool {
        let state = self.state.lock().await;
        state
            .stopped_at
            .is_some_and(|at| at.elapsed() < STOP_FLAG_TTL)
    }

    async fn clear_stopped_flag(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.stopped_at = None;
        Ok(())
    }

    async fn pull_next(
        &self,
        can_take: &(dyn for<'a> Fn(&'a ProbeJob) -> bool + Send + Sync),
    ) -> Result<Option<ProbeJob>> {
        let mut state = self.state.lock().await;
        let position = state.waiting.iter().position(|job| can_take(job));
        let Some(position) = position else {
            return Ok(None);
        };
        let job = state
            .waiting
            .remove(position)
            .expect("position 来自同一把锁内的查找");
        state.active.insert(job.job_id.clone(), job.clone());
        Ok(Some(job))
    }

    async fn mark_done(&self, job_id: &str, success: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.active.remove(job_id).is_some() {
            if success {
                state.completed += 1;
            } else {
                state.failed += 1;
            }
        }
        Ok(())
    }

    async fn has_pending_for_model(&self, model_id: i32, exclude_job_id: &str) -> Result<bool> {
        let state = self.state.lock().await;
        let in_waiting = state.waiting.iter().any(|j| j.model_id == model_id);
        let in_active = state
            .active
            .values()
            .any(|j| j.model_id == model_id && j.job_id != exclude_job_id);
        Ok(in_waiting || in_active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::EndpointKind;

    fn job(model_id: i32, channel_id: i32, suffix: &str) -> ProbeJob {
        ProbeJob {
            job_id: format!("{channel_id}-{model_id}-chat-0-{suffix}"),
            channel_id,
            model_id,
            model_name: "gpt-4".to_string(),
            endpoint_kind: EndpointKind::Chat,
            base_url: "https://api.example.test".to_string(),
            api_key: "sk-test".to_string(),
            proxy_url: None,
        }
    }

    #[tokio::test]
    async fn test_fifo_pull_and_done() {
        let queue = MemoryProbeQueue::new();
        queue.enqueue(job(1, 1, "a")).await.unwrap();
        queue.enqueue(job(2, 1, "b")).await.unwrap();

        let first = queue.pull_next(&|_| true).await.unwrap().unwrap();
        assert_eq!(first.model_id, 1);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.waiting, 1);
        assert_eq!(stats.active, 1);

        queue.mark_done(&first.job_id, true).await.unwrap();
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.completed, 1);
    }

    #[tokio::test]
    async fn test_pull_next_honors_predicate() {
        let queue = MemoryProbeQueue::new();
        queue.enqueue(job(1, 1, "a")).await.unwrap();
        queue.enqueue(job(2, 2, "b")).await.unwrap();

        // 只接受渠道 2 的任务
        let picked = queue
            .pull_next(&|j: &ProbeJob| j.channel_id == 2)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.channel_id, 2);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.waiting, 1);
    }

    #[tokio::test]
    async fn test_testing_ids_union() {
        let queue = MemoryProbeQueue::new();
        queue
            .enqueue_bulk(vec![job(1, 1, "a"), job(2, 1, "b"), job(3, 2, "c")])
            .await
            .unwrap();
        let _ = queue.pull_next(&|_| true).await.unwrap();

        let models = queue.testing_model_ids().await.unwrap();
        assert_eq!(models, HashSet::from([1, 2, 3]));
        let channels = queue.testing_channel_ids().await.unwrap();
        assert_eq!(channels, HashSet::from([1, 2]));
    }

    #[tokio::test]
    async fn test_stop_and_drain_clears_waiting() {
        let queue = MemoryProbeQueue::new();
        queue
            .enqueue_bulk(vec![job(1, 1, "a"), job(2, 1, "b")])
            .await
            .unwrap();
        let in_flight = queue.pull_next(&|_| true).await.unwrap().unwrap();

        let drained = queue.stop_and_drain().await.unwrap();
        assert_eq!(drained.cleared, 1);
        assert_eq!(drained.jobs.len(), 1);
        assert!(queue.stopped_flag().await);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.failed, 1);

        // 在途任务按失败记账后归零
        queue.mark_done(&in_flight.job_id, false).await.unwrap();
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.failed, 2);

        queue.clear_stopped_flag().await.unwrap();
        assert!(!queue.stopped_flag().await);
    }

    #[tokio::test]
    async fn test_counters_reset_on_enqueue_after_idle() {
        let queue = MemoryProbeQueue::new();
        queue.enqueue(job(1, 1, "a")).await.unwrap();
        let pulled = queue.pull_next(&|_| true).await.unwrap().unwrap();
        queue.mark_done(&pulled.job_id, true).await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.completed, 1);

        // 闲置后的下一次入队开启新批次
        queue.enqueue(job(2, 1, "b")).await.unwrap();
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.waiting, 1);
    }

    #[tokio::test]
    async fn test_has_pending_for_model() {
        let queue = MemoryProbeQueue::new();
        queue
            .enqueue_bulk(vec![job(7, 1, "a"), job(7, 1, "b")])
            .await
            .unwrap();
        let current = queue.pull_next(&|_| true).await.unwrap().unwrap();

        assert!(queue
            .has_pending_for_model(7, &current.job_id)
            .await
            .unwrap());
        queue.mark_done(&current.job_id, true).await.unwrap();

        let second = queue.pull_next(&|_| true).await.unwrap().unwrap();
        assert!(!queue
            .has_pending_for_model(7, &second.job_id)
            .await
            .unwrap());
    }
}
