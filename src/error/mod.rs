//! # 错误处理模块
//!
//! 统一的错误类型定义和处理

mod macros;
mod types;

pub use types::*;

/// 应用结果类型
pub type Result<T> = std::result::Result<T, ProbeError>;

/// 通用错误上下文trait（等价于 anyhow 的 context，落到内部错误）
pub trait Context<T> {
    /// 附加上下文信息
    fn context<S: Into<String>>(self, message: S) -> Result<T>;
}

impl<T, E> Context<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn context<S: Into<String>>(self, message: S) -> Result<T> {
        self.map_err(|e| ProbeError::internal_with_source(message, e.into()))
    }
}

/// 错误上下文扩展trait
pub trait ErrorContext<T> {
    /// 添加配置错误上下文
    fn with_config_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// 添加数据库错误上下文
    fn with_database_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// 添加网络错误上下文
    fn with_network_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// 添加缓存错误上下文
    fn with_cache_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn with_config_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| ProbeError::config_with_source(f(), e.into()))
    }

    fn with_database_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| ProbeError::database_with_source(f(), e.into()))
    }

    fn with_network_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| ProbeError::network_with_source(f(), e.into()))
    }

    fn with_cache_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| ProbeError::cache_with_source(f(), e.into()))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn with_config_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.ok_or_else(|| ProbeError::config(f()))
    }

    fn with_database_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.ok_or_else(|| ProbeError::database(f()))
    }

    fn with_network_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.ok_or_else(|| ProbeError::network(f()))
    }

    fn with_cache_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.ok_or_else(|| ProbeError::cache(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = ProbeError::config("cron 表达式非法");
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(err.to_string().contains("cron 表达式非法"));

        let err = ProbeError::business("渠道不存在");
        assert_eq!(err.error_code(), "BUSINESS_ERROR");
    }

    #[test]
    fn test_error_context_on_result() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        let mapped = res.with_network_context(|| "探测请求失败".to_string());
        match mapped {
            Err(ProbeError::Network { message, source }) => {
                assert_eq!(message, "探测请求失败");
                assert!(source.is_some());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_error_context_on_option() {
        let none: Option<i32> = None;
        let mapped = none.with_database_context(|| "模型不存在".to_string());
        assert!(matches!(mapped, Err(ProbeError::Database { .. })));
    }
}
