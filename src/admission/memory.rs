//! # 进程内准入后端
//!
//! 原生计数 + `Notify` 唤醒，无轮询。两级检查在同一把锁内原子完成，
//! 不存在“渠道等待者占着全局槽位”的中间态。

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use super::{AcquireOutcome, AdmissionController, AdmissionLimits, AdmissionSnapshot};
use crate::error::Result;

#[derive(Default)]
struct Usage {
    global: u32,
    channels: HashMap<i32, u32>,
}

/// 进程内准入控制器
pub struct MemoryAdmission {
    limits: RwLock<AdmissionLimits>,
    usage: Mutex<Usage>,
    released: Notify,
}

impl MemoryAdmission {
    #[must_use]
    pub fn new(limits: AdmissionLimits) -> Self {
        Self {
            limits: RwLock::new(limits),
            usage: Mutex::new(Usage::default()),
            released: Notify::new(),
        }
    }

    /// 尝试一次性拿到两级槽位
    async fn try_take(&self, channel_id: i32) -> bool {
        let limits = *self.limits.read().await;
        let mut usage = self.usage.lock().await;
        let channel_in_use = usage.channels.get(&channel_id).copied().unwrap_or(0);
        if usage.global < limits.max_global && channel_in_use < limits.per_channel {
            usage.global += 1;
            *usage.channels.entry(channel_id).or_insert(0) += 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl AdmissionController for MemoryAdmission {
    async fn acquire(
        &self,
        channel_id: i32,
        cancel: &CancellationToken,
    ) -> Result<AcquireOutcome> {
        loop {
            if cancel.is_cancelled() {
                return Ok(AcquireOutcome::Stopped);
            }

            // 先注册唤醒，再检查，保证释放不会在检查与等待之间丢失
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_take(channel_id).await {
                return Ok(AcquireOutcome::Acquired);
            }

            tokio::select! {
                () = cancel.cancelled() => return Ok(AcquireOutcome::Stopped),
                () = &mut notified => {}
            }
        }
    }

    async fn release(&self, channel_id: i32) -> Result<()> {
        let mut usage = self.usage.lock().await;
        usage.global = usage.global.saturating_sub(1);
        if let Some(count) = usage.channels.get_mut(&channel_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                usage.channels.remove(&channel_id);
            }
        }
        drop(usage);
        self.released.notify_waiters();
        Ok(())
    }

    async fn set_limits(&self, limits: AdmissionLimits) {
        let mut guard = self.limits.write().await;
        if *guard != limits {
            *guard = limits;
            drop(guard);
            // 上限放宽时唤醒等待者
            self.released.notify_waiters();
        }
    }

    async fn reset_all(&self) -> Result<()> {
        let mut usage = self.usage.lock().await;
        usage.global = 0;
        usage.channels.clear();
        drop(usage);
        self.released.notify_waiters();
        Ok(())
    }

    async fn snapshot(&self) -> Result<AdmissionSnapshot> {
        let usage = self.usage.lock().await;
        let mut channel_in_use: Vec<(i32, u32)> = usage
            .channels
            .iter()
            .map(|(id, count)| (*id, *count))
            .collect();
        channel_in_use.sort_unstable();
        Ok(AdmissionSnapshot {
            global_in_use: usage.global,
            channel_in_use,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_release_counts() {
        let admission = MemoryAdmission::new(AdmissionLimits::new(3, 2));
        let cancel = CancellationToken::new();

        assert_eq!(
            admission.acquire(1, &cancel).await.unwrap(),
            AcquireOutcome::Acquired
        );
        assert_eq!(
            admission.acquire(1, &cancel).await.unwrap(),
            AcquireOutcome::Acquired
        );

        let snapshot = admission.snapshot().await.unwrap();
        assert_eq!(snapshot.global_in_use, 2);
        assert_eq!(snapshot.channel_in_use, vec![(1, 2)]);

        admission.release(1).await.unwrap();
        let snapshot = admission.snapshot().await.unwrap();
        assert_eq!(snapshot.global_in_use, 1);
    }

    #[tokio::test]
    async fn test_channel_limit_blocks_third() {
        let admission = Arc::new(MemoryAdmission::new(AdmissionLimits::new(10, 2)));
        let cancel = CancellationToken::new();

        admission.acquire(1, &cancel).await.unwrap();
        admission.acquire(1, &cancel).await.unwrap();

        let waiting = {
            let admission = Arc::clone(&admission);
            let cancel = cancel.clone();
            tokio::spawn(async move { admission.acquire(1, &cancel).await.unwrap() })
        };

        // 第三个获取者必须等待
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        admission.release(1).await.unwrap();
        let outcome = waiting.await.unwrap();
        assert_eq!(outcome, AcquireOutcome::Acquired);
    }

    #[tokio::test]
    async fn test_global_limit_across_channels() {
        let admission = Arc::new(MemoryAdmission::new(AdmissionLimits::new(2, 2)));
        let cancel = CancellationToken::new();

        admission.acquire(1, &cancel).await.unwrap();
        admission.acquire(2, &cancel).await.unwrap();

        let waiting = {
            let admission = Arc::clone(&admission);
            let cancel = cancel.clone();
            tokio::spawn(async move { admission.acquire(3, &cancel).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        admission.release(2).await.unwrap();
        assert_eq!(waiting.await.unwrap(), AcquireOutcome::Acquired);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let admission = Arc::new(MemoryAdmission::new(AdmissionLimits::new(1, 1)));
        let cancel = CancellationToken::new();
        admission.acquire(1, &cancel).await.unwrap();

        let waiting = {
            let admission = Arc::clone(&admission);
            let cancel = cancel.clone();
            tokio::spawn(async move { admission.acquire(1, &cancel).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        assert_eq!(waiting.await.unwrap(), AcquireOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_reset_all_clears_usage() {
        let admission = MemoryAdmission::new(AdmissionLimits::new(3, 2));
        let cancel = CancellationToken::new();
        admission.acquire(1, &cancel).await.unwrap();
        admission.acquire(2, &cancel).await.unwrap();

        admission.reset_all().await.unwrap();
        let snapshot = admission.snapshot().await.unwrap();
        assert_eq!(snapshot, AdmissionSnapshot::default());
    }
}
