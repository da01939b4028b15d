//! # 应用配置结构定义

use serde::{Deserialize, Serialize};
use std::env;

/// 应用主配置结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 数据库配置
    pub database: DatabaseConfig,
    /// Redis 配置；缺省时队列/准入/进度总线使用进程内实现
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConfig>,
    /// 探测 worker 配置（仅作为数据库缺省值的兜底）
    pub worker: WorkerDefaults,
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库连接URL
    pub url: String,
    /// 最大连接数
    pub max_connections: u32,
    /// 连接超时时间（秒）
    pub connect_timeout: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/probe.db".to_string(),
            max_connections: 10,
            connect_timeout: 10,
        }
    }
}

/// Redis配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis连接URL
    pub url: String,
    /// 连接超时时间（秒）
    pub connection_timeout: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            connection_timeout: 10,
        }
    }
}

/// worker 启动缺省值
///
/// 运行期以数据库中的调度配置为准（5 秒记忆化刷新），
/// 这里只承载启动时的环境变量覆盖。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDefaults {
    pub channel_concurrency: u32,
    pub max_global_concurrency: u32,
    pub min_jitter_ms: u64,
    pub max_jitter_ms: u64,
    pub cron_schedule: String,
    pub log_retention_days: u32,
    /// 需要补充 chat 探测的主端点类型名单（逗号分隔，默认空）
    pub secondary_chat_kinds: String,
}

impl Default for WorkerDefaults {
    fn default() -> Self {
        Self {
            channel_concurrency: 5,
            max_global_concurrency: 30,
            min_jitter_ms: 3000,
            max_jitter_ms: 5000,
            cron_schedule: "0 */6 * * *".to_string(),
            log_retention_days: 7,
            secondary_chat_kinds: String::new(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            redis: None,
            worker: WorkerDefaults::default(),
        }
    }
}

impl AppConfig {
    /// 从环境变量构建配置（仅在进程启动时调用一次）
    ///
    /// 支持的变量：`DATABASE_URL`、`BROKER_URL`（缺省则使用进程内队列）、
    /// `CHANNEL_CONCURRENCY`、`MAX_GLOBAL_CONCURRENCY`、
    /// `DETECTION_MIN_DELAY_MS`、`DETECTION_MAX_DELAY_MS`、
    /// `CRON_SCHEDULE`、`LOG_RETENTION_DAYS`
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(url) = env::var("BROKER_URL") {
            config.redis = Some(RedisConfig {
                url,
                ..RedisConfig::default()
            });
        }
        if let Some(v) = parse_env("CHANNEL_CONCURRENCY") {
            config.worker.channel_concurrency = v;
        }
        if let Some(v) = parse_env("MAX_GLOBAL_CONCURRENCY") {
            config.worker.max_global_concurrency = v;
        }
        if let Some(v) = parse_env("DETECTION_MIN_DELAY_MS") {
            config.worker.min_jitter_ms = v;
        }
        if let Some(v) = parse_env("DETECTION_MAX_DELAY_MS") {
            config.worker.max_jitter_ms = v;
        }
        if let Ok(expr) = env::var("CRON_SCHEDULE") {
            config.worker.cron_schedule = expr;
        }
        if let Some(v) = parse_env("LOG_RETENTION_DAYS") {
            config.worker.log_retention_days = v;
        }
        if let Ok(kinds) = env::var("PROBE_SECONDARY_CHAT_KINDS") {
            config.worker.secondary_chat_kinds = kinds;
        }

        config.normalize();
        config
    }

    /// 约束修正：并发与抖动的关系
    fn normalize(&mut self) {
        if self.worker.channel_concurrency == 0 {
            self.worker.channel_concurrency = 1;
        }
        if self.worker.max_global_concurrency < self.worker.channel_concurrency {
            self.worker.max_global_concurrency = self.worker.channel_concurrency;
        }
        if self.worker.max_jitter_ms < self.worker.min_jitter_ms {
            self.worker.max_jitter_ms = self.worker.min_jitter_ms;
        }
    }

    /// 是否启用 broker 模式
    #[must_use]
    pub fn broker_enabled(&self) -> bool {
        self.redis.is_some()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(!config.broker_enabled());
        assert_eq!(config.worker.channel_concurrency, 5);
        assert_eq!(config.worker.max_global_concurrency, 30);
        assert_eq!(config.worker.cron_schedule, "0 */6 * * *");
        assert_eq!(config.worker.log_retention_days, 7);
    }

    #[test]
    fn test_normalize_repairs_bounds() {
        let mut config = AppConfig::default();
        config.worker.channel_concurrency = 10;
        config.worker.max_global_concurrency = 3;
        config.worker.min_jitter_ms = 5000;
        config.worker.max_jitter_ms = 1000;
        config.normalize();
        assert_eq!(config.worker.max_global_concurrency, 10);
        assert_eq!(config.worker.max_jitter_ms, 5000);
    }
}
