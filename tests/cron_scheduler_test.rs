//! # 定时调度测试
//!
//! start 幂等、状态对象、立即清理与非法配置的同步报错

use chrono::{Duration as ChronoDuration, Utc};
use entity::check_logs;
use sea_orm::{EntityTrait, PaginatorTrait, Set};

use api_probe::cronjobs::CronTask;
use api_probe::repository::SchedulerSettings;
use api_probe::testing::fixtures::{ChannelFixture, ModelFixture};
use api_probe::testing::helpers::{seed_channel, seed_model, setup_stack};

#[tokio::test]
async fn test_start_detection_is_idempotent() {
    let stack = setup_stack(SchedulerSettings::default()).await;

    stack.cron.start_detection().await.unwrap();
    // 第二次 start 直接成功，不会出现第二个 ticker
    stack.cron.start_detection().await.unwrap();

    let status = stack.cron.status().await.unwrap();
    assert!(status.detection.running);
    assert_eq!(status.detection.schedule, "0 */6 * * *");
    assert!(status.detection.next_run.is_some());
    assert!(status.detection.next_run.unwrap() > Utc::now());

    stack.cron.stop_task(CronTask::Detection).await;
    let status = stack.cron.status().await.unwrap();
    assert!(!status.detection.running);
}

#[tokio::test]
async fn test_start_all_and_status_shape() {
    let stack = setup_stack(SchedulerSettings::default()).await;

    stack.cron.start_all().await.unwrap();
    let status = stack.cron.status().await.unwrap();
    assert!(status.detection.running);
    assert!(status.cleanup.running);
    assert_eq!(status.cleanup.schedule, "0 2 * * *");
    assert_eq!(status.cleanup.retention_days, 7);
    assert!(status.cleanup.next_run.is_some());
    assert_eq!(status.config.channel_concurrency, 5);
    assert_eq!(status.config.max_global_concurrency, 30);
    assert_eq!(status.config.min_jitter_ms, 3000);
    assert_eq!(status.config.max_jitter_ms, 5000);

    stack.cron.stop_all().await;
    let status = stack.cron.status().await.unwrap();
    assert!(!status.detection.running);
    assert!(!status.cleanup.running);
}

#[tokio::test]
async fn test_cleanup_now_honors_retention() {
    let stack = setup_stack(SchedulerSettings::default()).await;
    let channel = seed_channel(&stack.db, ChannelFixture::new()).await;
    let model = seed_model(&stack.db, ModelFixture::new().channel_id(channel.id)).await;

    let old = (Utc::now() - ChronoDuration::days(10)).naive_utc();
    let fresh = (Utc::now() - ChronoDuration::days(1)).naive_utc();
    let mut rows = Vec::new();
    for i in 0..30 {
        rows.push(check_logs::ActiveModel {
            model_id: Set(model.id),
            endpoint_kind: Set("chat".to_string()),
            status: Set("fail".to_string()),
            latency_ms: Set(0),
            created_at: Set(if i < 20 { old } else { fresh }),
            ..Default::default()
        });
    }
    check_logs::Entity::insert_many(rows)
        .exec(stack.db.as_ref())
        .await
        .unwrap();

    let deleted = stack.cron.cleanup_now().await.unwrap();
    assert_eq!(deleted, 20);

    let remaining = check_logs::Entity::find()
        .count(stack.db.as_ref())
        .await
        .unwrap();
    assert_eq!(remaining, 10);
}

#[tokio::test]
async fn test_invalid_cron_expression_rejected_at_start() {
    let stack = setup_stack(SchedulerSettings::default()).await;

    let mut settings = SchedulerSettings::default();
    settings.cron_expression = "not a cron".to_string();
    stack.repository.upsert_scheduler_config(&settings).await.unwrap();

    let err = stack.cron.start_detection().await.unwrap_err();
    assert!(err.to_string().contains("cron"));

    let status = stack.cron.status().await.unwrap();
    assert!(!status.detection.running);
    assert!(status.detection.next_run.is_none());
}

#[tokio::test]
async fn test_scheduler_config_roundtrip() {
    let stack = setup_stack(SchedulerSettings::default()).await;

    let mut settings = SchedulerSettings::default();
    settings.enabled = true;
    settings.cron_expression = "15 2 * * 1-5".to_string();
    settings.timezone = "Asia/Shanghai".to_string();
    settings.detect_all_channels = false;
    settings.selected_channel_ids = Some(vec![1, 3]);
    settings.selected_model_ids = Some([(1, vec![10, 11]), (3, vec![30])].into_iter().collect());
    settings.log_retention_days = 14;

    stack.repository.upsert_scheduler_config(&settings).await.unwrap();
    let loaded = stack.repository.load_scheduler_config().await.unwrap();
    assert_eq!(loaded, settings);

    // 不变量违例被拒绝
    let mut bad = settings;
    bad.max_global_concurrency = 1;
    assert!(stack.repository.upsert_scheduler_config(&bad).await.is_err());
}
