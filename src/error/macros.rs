//! # 错误处理宏

/// 快速创建配置错误的宏
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::ProbeError::config($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::ProbeError::config(format!($fmt, $($arg)*))
    };
}

/// 快速创建数据库错误的宏
#[macro_export]
macro_rules! database_error {
    ($msg:expr) => {
        $crate::error::ProbeError::database($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::ProbeError::database(format!($fmt, $($arg)*))
    };
}

/// 快速创建网络错误的宏
#[macro_export]
macro_rules! network_error {
    ($msg:expr) => {
        $crate::error::ProbeError::network($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::ProbeError::network(format!($fmt, $($arg)*))
    };
}

/// 快速创建队列错误的宏
#[macro_export]
macro_rules! queue_error {
    ($msg:expr) => {
        $crate::error::ProbeError::queue($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::ProbeError::queue(format!($fmt, $($arg)*))
    };
}

/// 快速创建业务错误的宏
#[macro_export]
macro_rules! business_error {
    ($msg:expr) => {
        $crate::error::ProbeError::business($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::ProbeError::business(format!($fmt, $($arg)*))
    };
}

/// 快速创建内部错误的宏
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::ProbeError::internal($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::ProbeError::internal(format!($fmt, $($arg)*))
    };
}

/// 确保条件成立，否则返回配置错误
#[macro_export]
macro_rules! ensure_config {
    ($cond:expr, $msg:expr) => {
        if !($cond) {
            return Err($crate::config_error!($msg));
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            return Err($crate::config_error!($fmt, $($arg)*));
        }
    };
}

/// 确保条件成立，否则返回业务错误
#[macro_export]
macro_rules! ensure_business {
    ($cond:expr, $msg:expr) => {
        if !($cond) {
            return Err($crate::business_error!($msg));
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            return Err($crate::business_error!($fmt, $($arg)*));
        }
    };
}
