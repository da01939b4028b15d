//! # 测试数据 Fixtures
//!
//! 提供测试用的数据结构和预设数据

use entity::{channel_keys, channels, models};
use sea_orm::Set;

use crate::probe::ModelHealth;
use crate::repository::SchedulerSettings;

/// 渠道测试数据构建器
pub struct ChannelFixture {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub key_mode: String,
    pub proxy_url: Option<String>,
    pub enabled: bool,
    pub sort_order: i32,
}

impl Default for ChannelFixture {
    fn default() -> Self {
        Self {
            name: "test_channel".to_string(),
            base_url: "https://api.example.test".to_string(),
            api_key: "sk-test1234567890".to_string(),
            key_mode: "single".to_string(),
            proxy_url: None,
            enabled: true,
            sort_order: 0,
        }
    }
}

impl ChannelFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn api_key(mut self, api_key: &str) -> Self {
        self.api_key = api_key.to_string();
        self
    }

    pub fn proxy_url(mut self, proxy_url: &str) -> Self {
        self.proxy_url = Some(proxy_url.to_string());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn sort_order(mut self, sort_order: i32) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// 转换为 Sea-ORM ActiveModel
    pub fn to_active_model(self) -> channels::ActiveModel {
        let now = chrono::Utc::now().naive_utc();
        channels::ActiveModel {
            name: Set(self.name),
            base_url: Set(self.base_url),
            api_key: Set(self.api_key),
            key_mode: Set(self.key_mode),
            proxy_url: Set(self.proxy_url),
            enabled: Set(self.enabled),
            sort_order: Set(self.sort_order),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
    }
}

/// 模型测试数据构建器
pub struct ModelFixture {
    pub channel_id: i32,
    pub model_name: String,
    pub health_status: ModelHealth,
}

impl Default for ModelFixture {
    fn default() -> Self {
        Self {
            channel_id: 1,
            model_name: "gpt-4".to_string(),
            health_status: ModelHealth::Unknown,
        }
    }
}

impl ModelFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel_id(mut self, channel_id: i32) -> Self {
        self.channel_id = channel_id;
        self
    }

    pub fn model_name(mut self, model_name: &str) -> Self {
        self.model_name = model_name.to_string();
        self
    }

    pub fn health_status(mut self, health_status: ModelHealth) -> Self {
        self.health_status = health_status;
        self
    }

    pub fn to_active_model(self) -> models::ActiveModel {
        models::ActiveModel {
            channel_id: Set(self.channel_id),
            model_name: Set(self.model_name),
            health_status: Set(self.health_status.as_str().to_string()),
            created_at: Set(chrono::Utc::now().naive_utc()),
            ..Default::default()
        }
    }
}

/// 渠道附加密钥测试数据构建器
pub struct ChannelKeyFixture {
    pub channel_id: i32,
    pub api_key: String,
    pub sort_order: i32,
}

impl Default for ChannelKeyFixture {
    fn default() -> Self {
        Self {
            channel_id: 1,
            api_key: "sk-extra-key".to_string(),
            sort_order: 0,
        }
    }
}

impl ChannelKeyFixture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel_id(mut self, channel_id: i32) -> Self {
        self.channel_id = channel_id;
        self
    }

    pub fn api_key(mut self, api_key: &str) -> Self {
        self.api_key = api_key.to_string();
        self
    }

    pub fn sort_order(mut self, sort_order: i32) -> Self {
        self.sort_order = sort_order;
        self
    }

    pub fn to_active_model(self) -> channel_keys::ActiveModel {
        channel_keys::ActiveModel {
            channel_id: Set(self.channel_id),
            api_key: Set(self.api_key),
            sort_order: Set(self.sort_order),
            created_at: Set(chrono::Utc::now().naive_utc()),
            ..Default::default()
        }
    }
}

/// 调度配置测试数据
pub struct SchedulerSettingsFixture;

impl SchedulerSettingsFixture {
    /// 测试用小抖动配置（探测不等几秒）
    pub fn fast() -> SchedulerSettings {
        SchedulerSettings {
            enabled: true,
            min_jitter_ms: 0,
            max_jitter_ms: 0,
            ..SchedulerSettings::default()
        }
    }

    /// 固定抖动配置
    pub fn with_jitter(jitter_ms: u64) -> SchedulerSettings {
        SchedulerSettings {
            enabled: true,
            min_jitter_ms: jitter_ms,
            max_jitter_ms: jitter_ms,
            ..SchedulerSettings::default()
        }
    }

    /// 限定并发的配置
    pub fn with_concurrency(max_global: u32, per_channel: u32) -> SchedulerSettings {
        SchedulerSettings {
            enabled: true,
            channel_concurrency: per_channel,
            max_global_concurrency: max_global,
            min_jitter_ms: 0,
            max_jitter_ms: 0,
            ..SchedulerSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_fixture() {
        let channel = ChannelFixture::new()
            .name("openai_main")
            .base_url("https://api.openai.test")
            .to_active_model();
        assert_eq!(channel.name.as_ref(), "openai_main");
        assert_eq!(channel.base_url.as_ref(), "https://api.openai.test");
        assert_eq!(channel.enabled.as_ref(), &true);
    }

    #[test]
    fn test_model_fixture() {
        let model = ModelFixture::new()
            .channel_id(3)
            .model_name("claude-3-haiku")
            .to_active_model();
        assert_eq!(model.channel_id.as_ref(), &3);
        assert_eq!(model.model_name.as_ref(), "claude-3-haiku");
        assert_eq!(model.health_status.as_ref(), "unknown");
    }

    #[test]
    fn test_settings_fixtures() {
        let fast = SchedulerSettingsFixture::fast();
        assert_eq!(fast.max_jitter_ms, 0);
        assert!(fast.validate().is_ok());

        let bounded = SchedulerSettingsFixture::with_concurrency(3, 2);
        assert_eq!(bounded.max_global_concurrency, 3);
        assert!(bounded.validate().is_ok());
    }
}
