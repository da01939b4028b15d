//! # 渠道密钥校验测试
//!
//! 主密钥与附加密钥逐个试探；附加密钥的结果回写 last_valid / last_checked_at

use sea_orm::ActiveModelTrait;
use std::sync::Arc;
use std::time::Duration;

use api_probe::keys::ChannelKeyService;
use api_probe::probe::ProbeExecutor;
use api_probe::repository::SchedulerSettings;
use api_probe::testing::fixtures::{ChannelFixture, ChannelKeyFixture, ModelFixture};
use api_probe::testing::helpers::{seed_channel, seed_model, setup_stack};
use api_probe::testing::mocks::{bodies, MockRoute, MockUpstream};

#[tokio::test]
async fn test_validate_channel_keys_marks_each_key() {
    // 只有 sk-good 的请求返回 200
    let upstream = MockUpstream::start(vec![
        MockRoute::with_header("/v1/chat/completions", "sk-good", 200, bodies::CHAT_OK),
        MockRoute::new("/v1/chat/completions", 401, bodies::UNAUTHORIZED),
    ])
    .await;

    let stack = setup_stack(SchedulerSettings::default()).await;
    let channel = seed_channel(
        &stack.db,
        ChannelFixture::new()
            .base_url(upstream.base_url())
            .api_key("sk-good-primary"),
    )
    .await;
    seed_model(&stack.db, ModelFixture::new().channel_id(channel.id)).await;

    let good_key = ChannelKeyFixture::new()
        .channel_id(channel.id)
        .api_key("sk-good-extra")
        .sort_order(0)
        .to_active_model()
        .insert(stack.db.as_ref())
        .await
        .unwrap();
    let bad_key = ChannelKeyFixture::new()
        .channel_id(channel.id)
        .api_key("sk-revoked")
        .sort_order(1)
        .to_active_model()
        .insert(stack.db.as_ref())
        .await
        .unwrap();

    let service = ChannelKeyService::new(
        Arc::clone(&stack.repository),
        Arc::new(ProbeExecutor::new(Duration::from_secs(5))),
    );
    let results = service
        .validate_channel_keys(channel.id, None)
        .await
        .unwrap();

    // 主密钥 + 两把附加密钥，按顺序
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].key_id, None);
    assert!(results[0].valid);
    assert_eq!(results[1].key_id, Some(good_key.id));
    assert!(results[1].valid);
    assert_eq!(results[2].key_id, Some(bad_key.id));
    assert!(!results[2].valid);
    assert!(results[2].error_msg.as_deref().unwrap().starts_with("HTTP 401"));
    // 结果不带明文密钥
    assert!(!results[2].api_key_masked.contains("sk-revoked"));

    // 附加密钥的校验结果已回写
    let keys = stack.repository.list_channel_keys(channel.id).await.unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0].last_valid, Some(true));
    assert!(keys[0].last_checked_at.is_some());
    assert_eq!(keys[1].last_valid, Some(false));

    assert_eq!(upstream.hit_count(), 3);
}

#[tokio::test]
async fn test_validate_without_models_is_business_error() {
    let stack = setup_stack(SchedulerSettings::default()).await;
    let channel = seed_channel(&stack.db, ChannelFixture::new()).await;

    let service = ChannelKeyService::new(
        Arc::clone(&stack.repository),
        Arc::new(ProbeExecutor::new(Duration::from_secs(2))),
    );
    let err = service
        .validate_channel_keys(channel.id, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("没有可用于校验的模型"));
}
