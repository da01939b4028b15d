//! # 统一日志工具模块
//!
//! 提供完整的日志工具链：
//! - 探测流水线各阶段的结构化日志宏
//! - 日志系统初始化和配置

use std::env;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 日志阶段枚举
#[derive(Debug, Clone, Copy)]
pub enum LogStage {
    Startup,
    Shutdown,
    Detection,
    Enqueue,
    Admission,
    Jitter,
    Probe,
    Persist,
    Publish,
    Scheduling,
    Cleanup,
    Sync,
    Cache,
    Db,
    Internal,
    BackgroundTask,
}

impl LogStage {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
            Self::Detection => "detection",
            Self::Enqueue => "enqueue",
            Self::Admission => "admission",
            Self::Jitter => "jitter",
            Self::Probe => "probe",
            Self::Persist => "persist",
            Self::Publish => "publish",
            Self::Scheduling => "scheduling",
            Self::Cleanup => "cleanup",
            Self::Sync => "sync",
            Self::Cache => "cache",
            Self::Db => "db",
            Self::Internal => "internal",
            Self::BackgroundTask => "background_task",
        }
    }
}

/// 组件枚举
#[derive(Debug, Clone, Copy)]
pub enum LogComponent {
    // --- System Components ---
    Main,
    Config,
    Database,
    Cache,
    // --- Probe Engine Components ---
    Queue,
    Admission,
    Worker,
    ProbeExec,
    Strategy,
    Repository,
    ProgressBus,
    Detection,
    CronScheduler,
    CatalogSync,
    KeyPool,
}

impl LogComponent {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Config => "config",
            Self::Database => "database",
            Self::Cache => "cache",
            Self::Queue => "queue",
            Self::Admission => "admission",
            Self::Worker => "worker",
            Self::ProbeExec => "probe_exec",
            Self::Strategy => "strategy",
            Self::Repository => "repository",
            Self::ProgressBus => "progress_bus",
            Self::Detection => "detection",
            Self::CronScheduler => "cron_scheduler",
            Self::CatalogSync => "catalog_sync",
            Self::KeyPool => "key_pool",
        }
    }
}

/// 标准日志宏 - 信息级别
#[macro_export]
macro_rules! linfo {
    ($job_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr, $($rest:tt)*) => {
        tracing::info!(
            job_id = %$job_id,
            stage = $stage.as_str(),
            operation = $operation,
            component = $component.as_str(),
            message = %$description,
            $($rest)*
        )
    };
    ($job_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr) => {
        tracing::info!(
            job_id = %$job_id,
            stage = $stage.as_str(),
            operation = $operation,
            component = $component.as_str(),
            message = %$description,
        )
    };
}

/// 标准日志宏 - 调试级别
#[macro_export]
macro_rules! ldebug {
    ($job_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr, $($rest:tt)*) => {
        tracing::debug!(
            job_id = %$job_id,
            stage = $stage.as_str(),
            operation = $operation,
            component = $component.as_str(),
            message = %$description,
            $($rest)*
        )
    };
    ($job_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr) => {
        tracing::debug!(
            job_id = %$job_id,
            stage = $stage.as_str(),
            operation = $operation,
            component = $component.as_str(),
            message = %$description,
        )
    };
}

/// 标准日志宏 - 警告级别
#[macro_export]
macro_rules! lwarn {
    ($job_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr, $($rest:tt)*) => {
        tracing::warn!(
            job_id = %$job_id,
            stage = $stage.as_str(),
            operation = $operation,
            component = $component.as_str(),
            message = %$description,
            $($rest)*
        )
    };
    ($job_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr) => {
        tracing::warn!(
            job_id = %$job_id,
            stage = $stage.as_str(),
            operation = $operation,
            component = $component.as_str(),
            message = %$description,
        )
    };
}

/// 标准日志宏 - 错误级别
#[macro_export]
macro_rules! lerror {
    ($job_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr, $($rest:tt)*) => {
        tracing::error!(
            job_id = %$job_id,
            stage = $stage.as_str(),
            operation = $operation,
            component = $component.as_str(),
            message = %$description,
            $($rest)*
        )
    };
    ($job_id:expr, $stage:expr, $component:expr, $operation:expr, $description:expr) => {
        tracing::error!(
            job_id = %$job_id,
            stage = $stage.as_str(),
            operation = $operation,
            component = $component.as_str(),
            message = %$description,
        )
    };
}

/// 脱敏API密钥
#[must_use]
pub fn sanitize_api_key(api_key: &str) -> String {
    if api_key.len() > 8 {
        format!(
            "{}...{}",
            &api_key[..4],
            &api_key[api_key.len().saturating_sub(4)..]
        )
    } else if !api_key.is_empty() {
        "***".to_string()
    } else {
        "<empty>".to_string()
    }
}

// ================ 日志系统初始化和配置 ================

/// 日志系统配置
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// 默认日志级别
    pub default_level: String,
    /// 应用程序日志级别
    pub app_level: String,
    /// Sea ORM 查询日志级别
    pub sea_orm_level: String,
    /// `SQLx` 通用日志级别
    pub sqlx_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            app_level: "debug".to_string(),
            sea_orm_level: "warn".to_string(),
            sqlx_level: "warn".to_string(),
        }
    }
}

impl LoggingConfig {
    /// 创建生产环境配置
    #[must_use]
    pub fn production() -> Self {
        Self {
            default_level: "info".to_string(),
            app_level: "info".to_string(),
            sea_orm_level: "warn".to_string(),
            sqlx_level: "warn".to_string(),
        }
    }

    /// 创建开发环境配置
    #[must_use]
    pub fn development() -> Self {
        Self {
            default_level: "debug".to_string(),
            app_level: "trace".to_string(),
            sea_orm_level: "debug".to_string(),
            sqlx_level: "debug".to_string(),
        }
    }

    /// 创建测试环境配置
    #[must_use]
    pub fn testing() -> Self {
        Self {
            default_level: "warn".to_string(),
            app_level: "debug".to_string(),
            sea_orm_level: "off".to_string(),
            sqlx_level: "warn".to_string(),
        }
    }

    /// 构建日志过滤器字符串
    #[must_use]
    pub fn build_filter(&self) -> String {
        format!(
            "{},api_probe={},sea_orm::query={},sqlx={}",
            self.default_level, self.app_level, self.sea_orm_level, self.sqlx_level
        )
    }

    /// 从环境变量创建配置
    ///
    /// 支持通过 `LOG_MODE` 环境变量选择预设模式：
    /// - "production": 生产环境（性能优先，关闭数据库查询日志）
    /// - "development": 开发环境（详细日志，启用数据库查询）
    /// - "testing": 测试环境（最小日志）
    /// - 未设置时默认使用 "production"
    #[must_use]
    pub fn from_env() -> Self {
        match env::var("LOG_MODE").ok().as_deref() {
            Some("development") => Self::development(),
            Some("testing") => Self::testing(),
            _ => Self::production(),
        }
    }
}

/// 初始化日志系统
pub fn init_logging(log_level: Option<&String>) {
    let config = LoggingConfig::from_env();

    // 如果有传入的日志级别，覆盖默认级别
    let final_config = if let Some(level) = log_level {
        let mut config = config;
        config.default_level.clone_from(level);
        config
    } else {
        config
    };

    let filter_string = final_config.build_filter();

    // 从环境变量获取覆盖配置，如果没有则使用构建的配置
    let log_filter = env::var("RUST_LOG").unwrap_or(filter_string);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(&log_filter).unwrap_or_else(|_| EnvFilter::default())
    });

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(tracing_subscriber::filter::FilterFn::new(|metadata| {
            // 过滤掉一些噪音日志
            !metadata.target().starts_with("h2::client")
                && !metadata.target().starts_with("hyper::")
                && !metadata.target().starts_with("tokio::runtime")
        }));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Main,
        "log_init",
        &format!("日志系统已启动 | 过滤器: {log_filter}")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_api_key() {
        assert_eq!(sanitize_api_key("sk-1234567890abcdef"), "sk-1...cdef");
        assert_eq!(sanitize_api_key("short"), "***");
        assert_eq!(sanitize_api_key(""), "<empty>");
    }

    #[test]
    fn test_build_filter() {
        let filter = LoggingConfig::production().build_filter();
        assert!(filter.contains("api_probe=info"));
        assert!(filter.contains("sea_orm::query=warn"));
    }
}
