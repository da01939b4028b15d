//! # 探测进度总线
//!
//! 进程内发布/订阅。发布永不阻塞：底层是有界 broadcast 通道，慢消费者
//! 落后时丢弃事件（at-most-once）。多进程模式下事件镜像到 Redis 频道，
//! 以 `source_id` 去重，只转发非本进程的事件。

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::error::Result;
use crate::logging::{LogComponent, LogStage};
use crate::probe::{EndpointKind, ProbeStatus};
use crate::{ldebug, linfo, lwarn};

/// Redis 镜像频道名
pub const PROGRESS_CHANNEL: &str = "probe:progress";

/// 本地订阅通道容量；落后超过容量的订阅者丢事件
const BUS_CAPACITY: usize = 1024;

/// 进度事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub channel_id: i32,
    pub model_id: i32,
    pub model_name: String,
    pub endpoint_kind: EndpointKind,
    pub status: ProbeStatus,
    pub latency_ms: i32,
    pub timestamp: DateTime<Utc>,
    /// 该模型是否已无其他未完成任务（订阅方据此撤掉“检测中”标记）
    pub is_model_complete: bool,
    /// 发布进程标识，多进程镜像去重用
    #[serde(default)]
    pub source_id: String,
}

/// 订阅句柄：drop 即退订
pub struct ProgressSubscription {
    handle: JoinHandle<()>,
}

impl ProgressSubscription {
    /// 显式退订
    pub fn unsubscribe(self) {
        self.handle.abort();
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// 进度总线
pub struct ProgressBus {
    sender: broadcast::Sender<ProgressEvent>,
    source_id: String,
    mirror: Option<ConnectionManager>,
}

impl ProgressBus {
    /// 单进程模式
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            sender,
            source_id: Uuid::new_v4().to_string(),
            mirror: None,
        }
    }

    /// 多进程模式：事件同时发布到 Redis 频道
    #[must_use]
    pub fn with_mirror(conn: ConnectionManager) -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            sender,
            source_id: Uuid::new_v4().to_string(),
            mirror: Some(conn),
        }
    }

    /// 本进程的发布源标识
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// 发布事件（永不阻塞；无订阅者时静默丢弃）
    pub async fn publish(&self, mut event: ProgressEvent) {
        event.source_id = self.source_id.clone();
        let _ = self.sender.send(event.clone());

        if let Some(conn) = &self.mirror {
            match serde_json::to_string(&event) {
                Ok(payload) => {
                    let mut conn = conn.clone();
                    let published: std::result::Result<i64, _> =
                        redis::AsyncCommands::publish(&mut conn, PROGRESS_CHANNEL, payload).await;
                    if let Err(e) = published {
                        lwarn!(
                            "system",
                            LogStage::Publish,
                            LogComponent::ProgressBus,
                            "mirror_publish_failed",
                            "进度事件镜像发布失败",
                            error = %e
                        );
                    }
                }
                Err(e) => {
                    lwarn!(
                        "system",
                        LogStage::Publish,
                        LogComponent::ProgressBus,
                        "event_encode_failed",
                        "进度事件序列化失败",
                        error = %e
                    );
                }
            }
        }
    }

    /// 只向本地订阅者转发（镜像任务回放外部事件时使用）
    fn emit_local(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }

    /// 订阅原始事件流
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// 回调式订阅；返回的句柄 drop 时自动退订。
    /// 任意线程/任务里调用都安全。
    #[must_use]
    pub fn subscribe_fn<F>(&self, listener: F) -> ProgressSubscription
    where
        F: Fn(ProgressEvent) + Send + 'static,
    {
        let mut receiver = self.sender.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => listener(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        ldebug!(
                            "system",
                            LogStage::Publish,
                            LogComponent::ProgressBus,
                            "subscriber_lagged",
                            "订阅者落后，事件被丢弃",
                            skipped = skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        ProgressSubscription { handle }
    }

    /// 启动 Redis 镜像订阅任务：回放其他进程发布的事件
    pub async fn start_mirror_task(
        self: &Arc<Self>,
        client: redis::Client,
    ) -> Result<JoinHandle<()>> {
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(PROGRESS_CHANNEL).await?;

        let bus = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(message) = stream.next().await {
                let Ok(payload) = message.get_payload::<String>() else {
                    continue;
                };
                match serde_json::from_str::<ProgressEvent>(&payload) {
                    Ok(event) => {
                        // 自己发的事件本地已经派发过
                        if event.source_id != bus.source_id {
                            bus.emit_local(event);
                        }
                    }
                    Err(e) => {
                        lwarn!(
                            "system",
                            LogStage::Publish,
                            LogComponent::ProgressBus,
                            "mirror_decode_failed",
                            "镜像事件解析失败",
                            error = %e
                        );
                    }
                }
            }
            linfo!(
                "system",
                LogStage::Shutdown,
                LogComponent::ProgressBus,
                "mirror_stopped",
                "进度镜像订阅已结束"
            );
        });
        Ok(handle)
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn event(model_id: i32, complete: bool) -> ProgressEvent {
        ProgressEvent {
            channel_id: 1,
            model_id,
            model_name: "gpt-4".to_string(),
            endpoint_kind: EndpointKind::Chat,
            status: ProbeStatus::Success,
            latency_ms: 120,
            timestamp: Utc::now(),
            is_model_complete: complete,
            source_id: String::new(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = ProgressBus::new();
        let mut receiver = bus.subscribe();

        bus.publish(event(1, true)).await;

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.model_id, 1);
        assert!(received.is_model_complete);
        assert_eq!(received.source_id, bus.source_id());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_block() {
        let bus = ProgressBus::new();
        // 没有任何订阅者也要立即返回
        bus.publish(event(1, false)).await;
    }

    #[tokio::test]
    async fn test_subscribe_fn_and_unsubscribe() {
        let bus = ProgressBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let subscription = {
            let seen = Arc::clone(&seen);
            bus.subscribe_fn(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
        };

        bus.publish(event(1, false)).await;
        bus.publish(event(2, false)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        subscription.unsubscribe();
        bus.publish(event(3, false)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_event_serde_roundtrip() {
        let source = event(9, true);
        let raw = serde_json::to_string(&source).unwrap();
        let parsed: ProgressEvent = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, source);
    }
}
