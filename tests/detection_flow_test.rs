//! # 检测服务端到端测试
//!
//! 真实 worker 池 + 进程内队列 + HTTP 上游桩，覆盖触发、入队、探测、
//! 落库、进度事件与目录同步

use std::time::Duration;

use entity::{check_logs, model_endpoints};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use api_probe::probe::ProbeStatus;
use api_probe::repository::SchedulerSettings;
use api_probe::testing::fixtures::{ChannelFixture, ModelFixture, SchedulerSettingsFixture};
use api_probe::testing::helpers::{seed_channel, seed_model, setup_stack, wait_for};
use api_probe::testing::mocks::{bodies, MockRoute, MockUpstream};

#[tokio::test]
async fn test_trigger_channel_happy_path() {
    let upstream = MockUpstream::start(vec![MockRoute::new(
        "/v1/chat/completions",
        200,
        bodies::CHAT_OK,
    )])
    .await;

    let stack = setup_stack(SchedulerSettingsFixture::fast()).await;
    let channel = seed_channel(
        &stack.db,
        ChannelFixture::new().base_url(upstream.base_url()).api_key("sk-ok"),
    )
    .await;
    let model = seed_model(
        &stack.db,
        ModelFixture::new().channel_id(channel.id).model_name("gpt-4"),
    )
    .await;

    let mut events = stack.bus.subscribe();
    stack.worker.start().await.unwrap();

    let result = stack.detection.trigger_channel(channel.id, None).await.unwrap();
    assert_eq!(result.channels, 1);
    assert_eq!(result.model_count, 1);
    assert_eq!(result.job_ids.len(), 1);

    // 等批次跑完
    let done = wait_for(Duration::from_secs(5), || async {
        let stats = stack.queue.stats().await.unwrap();
        !stats.is_running() && stats.completed == 1
    })
    .await;
    assert!(done, "批次未在期限内完成");

    // 端点行 + 聚合健康
    let endpoints = model_endpoints::Entity::find()
        .filter(model_endpoints::Column::ModelId.eq(model.id))
        .all(stack.db.as_ref())
        .await
        .unwrap();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].endpoint_kind, "chat");
    assert_eq!(endpoints[0].status, "success");

    let stored = stack.repository.find_model(model.id).await.unwrap().unwrap();
    assert_eq!(stored.health_status, "healthy");

    // 恰好一条日志
    let logs = check_logs::Entity::find()
        .filter(check_logs::Column::ModelId.eq(model.id))
        .all(stack.db.as_ref())
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, "success");

    // 进度事件：success 且模型已完成
    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("没有收到进度事件")
        .unwrap();
    assert_eq!(event.model_id, model.id);
    assert_eq!(event.status, ProbeStatus::Success);
    assert!(event.is_model_complete);
    assert_eq!(upstream.hit_count(), 1);

    stack.worker.stop().await;
}

#[tokio::test]
async fn test_trigger_model_upstream_error_yields_unhealthy() {
    let upstream = MockUpstream::start(vec![MockRoute::new(
        "/v1/messages",
        401,
        bodies::UNAUTHORIZED,
    )])
    .await;

    let stack = setup_stack(SchedulerSettingsFixture::fast()).await;
    let channel = seed_channel(
        &stack.db,
        ChannelFixture::new().base_url(upstream.base_url()),
    )
    .await;
    let model = seed_model(
        &stack.db,
        ModelFixture::new()
            .channel_id(channel.id)
            .model_name("claude-3-haiku"),
    )
    .await;

    stack.worker.start().await.unwrap();
    let result = stack.detection.trigger_model(model.id).await.unwrap();
    assert_eq!(result.job_ids.len(), 1);

    let done = wait_for(Duration::from_secs(5), || async {
        let stats = stack.queue.stats().await.unwrap();
        !stats.is_running()
    })
    .await;
    assert!(done);

    let stored = stack.repository.find_model(model.id).await.unwrap().unwrap();
    assert_eq!(stored.health_status, "unhealthy");
    assert_eq!(stored.last_status, Some(false));

    let endpoints = model_endpoints::Entity::find()
        .filter(model_endpoints::Column::ModelId.eq(model.id))
        .all(stack.db.as_ref())
        .await
        .unwrap();
    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].status_code, Some(401));
    assert!(endpoints[0]
        .error_msg
        .as_deref()
        .unwrap()
        .starts_with("HTTP 401"));

    stack.worker.stop().await;
}

#[tokio::test]
async fn test_trigger_resets_before_enqueue() {
    let stack = setup_stack(SchedulerSettingsFixture::fast()).await;
    let channel = seed_channel(&stack.db, ChannelFixture::new()).await;
    let model = seed_model(&stack.db, ModelFixture::new().channel_id(channel.id)).await;

    // 先造一份旧的探测状态
    use api_probe::probe::{EndpointKind, ProbeJob, ProbeOutcome};
    let job = ProbeJob {
        job_id: "old".to_string(),
        channel_id: channel.id,
        model_id: model.id,
        model_name: "gpt-4".to_string(),
        endpoint_kind: EndpointKind::Chat,
        base_url: channel.base_url.clone(),
        api_key: channel.api_key.clone(),
        proxy_url: None,
    };
    stack
        .repository
        .persist_probe_outcome(&job, &ProbeOutcome::success(EndpointKind::Chat, 50, 200, None))
        .await
        .unwrap();

    // worker 不启动：任务停在队列里，重置必须已经提交
    let result = stack.detection.trigger_channel(channel.id, None).await.unwrap();
    assert_eq!(result.job_ids.len(), 1);

    let stored = stack.repository.find_model(model.id).await.unwrap().unwrap();
    assert_eq!(stored.health_status, "unknown");
    let endpoints = model_endpoints::Entity::find()
        .filter(model_endpoints::Column::ModelId.eq(model.id))
        .all(stack.db.as_ref())
        .await
        .unwrap();
    assert!(endpoints.is_empty());

    // enqueueBulk → testingModelIds 组合律
    let testing = stack.queue.testing_model_ids().await.unwrap();
    assert!(testing.contains(&model.id));
    let snapshot = stack.detection.progress_snapshot().await.unwrap();
    assert!(snapshot.is_running);
    assert_eq!(snapshot.waiting, 1);
    assert_eq!(snapshot.testing_model_ids, vec![model.id]);
}

#[tokio::test]
async fn test_catalog_sync_adds_models() {
    let upstream = MockUpstream::start(vec![MockRoute::new(
        "/v1/models",
        200,
        bodies::MODELS_OK,
    )])
    .await;

    let stack = setup_stack(SchedulerSettings::default()).await;
    let channel = seed_channel(
        &stack.db,
        ChannelFixture::new().base_url(upstream.base_url()),
    )
    .await;

    let outcome = stack.catalog.sync_channel(&channel).await.unwrap();
    assert_eq!(outcome.added, 2);
    assert_eq!(outcome.total, 2);

    // 第二次同步：只增不删，全部已存在
    let outcome = stack.catalog.sync_channel(&channel).await.unwrap();
    assert_eq!(outcome.added, 0);
    assert_eq!(outcome.total, 2);

    let models = stack.repository.list_models_for_sync(channel.id).await.unwrap();
    let names: Vec<&str> = models.iter().map(|m| m.model_name.as_str()).collect();
    assert_eq!(names, vec!["gpt-4", "claude-3-haiku"]);
}

#[tokio::test]
async fn test_catalog_sync_empty_list_is_error() {
    let upstream =
        MockUpstream::start(vec![MockRoute::new("/v1/models", 200, r#"{"data":[]}"#)]).await;

    let stack = setup_stack(SchedulerSettings::default()).await;
    let channel = seed_channel(
        &stack.db,
        ChannelFixture::new().base_url(upstream.base_url()),
    )
    .await;

    let err = stack.catalog.sync_channel(&channel).await.unwrap_err();
    assert!(err.to_string().contains("empty model list"));
}

#[tokio::test]
async fn test_trigger_full_with_sync_enqueues_discovered_models() {
    let upstream = MockUpstream::start(vec![
        MockRoute::new("/v1/models", 200, bodies::MODELS_OK),
        MockRoute::new("/v1/chat/completions", 200, bodies::CHAT_OK),
        MockRoute::new("/v1/messages", 200, bodies::CLAUDE_OK),
    ])
    .await;

    let stack = setup_stack(SchedulerSettingsFixture::fast()).await;
    let channel = seed_channel(
        &stack.db,
        ChannelFixture::new().base_url(upstream.base_url()),
    )
    .await;

    stack.worker.start().await.unwrap();
    let result = stack.detection.trigger_full(true).await.unwrap();
    // 同步发现 gpt-4 与 claude-3-haiku，各一个端点探测
    assert_eq!(result.channels, 1);
    assert_eq!(result.model_count, 2);
    assert_eq!(result.job_ids.len(), 2);
    let sync_results = result.sync_results.unwrap();
    assert_eq!(sync_results.get(&channel.id).unwrap().added, 2);

    let done = wait_for(Duration::from_secs(5), || async {
        let stats = stack.queue.stats().await.unwrap();
        !stats.is_running() && stats.completed == 2
    })
    .await;
    assert!(done);

    for model in stack.repository.list_models_for_sync(channel.id).await.unwrap() {
        assert_eq!(model.health_status, "healthy");
    }

    stack.worker.stop().await;
}
