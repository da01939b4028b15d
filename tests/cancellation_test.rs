//! # 取消语义测试
//!
//! 停止检测后：排队任务立刻按取消落库，在途任务在下一个检查点短路，
//! 队列与准入计数全部归零

use std::time::Duration;

use entity::check_logs;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use api_probe::admission::AdmissionSnapshot;
use api_probe::probe::{ProbeStatus, CANCEL_ERROR_MSG};
use api_probe::repository::SchedulerSettings;
use api_probe::testing::fixtures::{ChannelFixture, ModelFixture};
use api_probe::testing::helpers::{seed_channel, seed_model, setup_stack, wait_for};
use api_probe::testing::mocks::{bodies, MockRoute, MockUpstream};

/// 抖动 300ms、渠道并发 2 的停止场景（参数缩小以压缩测试时长）
#[tokio::test]
async fn test_stop_detection_cancels_queued_and_in_flight() {
    let upstream = MockUpstream::start(vec![MockRoute::new(
        "/v1/chat/completions",
        200,
        bodies::CHAT_OK,
    )])
    .await;

    let settings = SchedulerSettings {
        enabled: true,
        channel_concurrency: 2,
        max_global_concurrency: 30,
        min_jitter_ms: 300,
        max_jitter_ms: 300,
        ..SchedulerSettings::default()
    };
    let stack = setup_stack(settings).await;

    let channel = seed_channel(
        &stack.db,
        ChannelFixture::new().base_url(upstream.base_url()),
    )
    .await;
    let mut model_ids = Vec::new();
    for i in 0..10 {
        let model = seed_model(
            &stack.db,
            ModelFixture::new()
                .channel_id(channel.id)
                .model_name(&format!("gpt-4-{i}")),
        )
        .await;
        model_ids.push(model.id);
    }

    let mut events = stack.bus.subscribe();
    stack.worker.start().await.unwrap();

    let result = stack.detection.trigger_channel(channel.id, None).await.unwrap();
    assert_eq!(result.job_ids.len(), 10);

    // 抖动窗口内喊停
    tokio::time::sleep(Duration::from_millis(50)).await;
    stack.detection.stop_detection().await.unwrap();
    assert!(stack.queue.stopped_flag().await);

    // 在一个“抖动 + 超时”窗口内全部收敛
    let settled = wait_for(Duration::from_secs(3), || async {
        let stats = stack.queue.stats().await.unwrap();
        stats.waiting == 0 && stats.active == 0
    })
    .await;
    assert!(settled, "停止后队列未在期限内清空");

    // 10 个任务全部按“用户停止”落库
    let logs_settled = wait_for(Duration::from_secs(2), || async {
        check_logs::Entity::find()
            .filter(check_logs::Column::ErrorMsg.eq(CANCEL_ERROR_MSG))
            .all(stack.db.as_ref())
            .await
            .unwrap()
            .len()
            == 10
    })
    .await;
    assert!(logs_settled, "取消日志数量不足 10 条");

    for model_id in &model_ids {
        let stored = stack.repository.find_model(*model_id).await.unwrap().unwrap();
        assert_eq!(stored.health_status, "unhealthy");
    }

    // 上游从未被真正探测
    assert_eq!(upstream.hit_count(), 0);

    // 准入计数清零
    let cleared = wait_for(Duration::from_secs(2), || async {
        stack.admission.snapshot().await.unwrap() == AdmissionSnapshot::default()
    })
    .await;
    assert!(cleared, "准入计数未归零");

    // 每个任务都有一条 FAIL 进度事件
    let mut fail_events = 0;
    while fail_events < 10 {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("进度事件不足")
            .unwrap();
        assert_eq!(event.status, ProbeStatus::Fail);
        fail_events += 1;
    }

    stack.worker.stop().await;
}

/// 新一轮触发先清停止标志
#[tokio::test]
async fn test_trigger_clears_stopped_flag() {
    let upstream = MockUpstream::start(vec![MockRoute::new(
        "/v1/chat/completions",
        200,
        bodies::CHAT_OK,
    )])
    .await;

    let mut settings = SchedulerSettings::default();
    settings.min_jitter_ms = 0;
    settings.max_jitter_ms = 0;
    let stack = setup_stack(settings).await;

    let channel = seed_channel(
        &stack.db,
        ChannelFixture::new().base_url(upstream.base_url()),
    )
    .await;
    let model = seed_model(&stack.db, ModelFixture::new().channel_id(channel.id)).await;

    stack.detection.stop_detection().await.unwrap();
    assert!(stack.queue.stopped_flag().await);

    stack.worker.start().await.unwrap();
    stack.detection.trigger_model(model.id).await.unwrap();
    assert!(!stack.queue.stopped_flag().await);

    let done = wait_for(Duration::from_secs(5), || async {
        let stats = stack.queue.stats().await.unwrap();
        !stats.is_running() && stats.completed == 1
    })
    .await;
    assert!(done);

    let stored = stack.repository.find_model(model.id).await.unwrap().unwrap();
    assert_eq!(stored.health_status, "healthy");

    stack.worker.stop().await;
}
