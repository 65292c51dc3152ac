//! 错误代码和错误类别定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 节点选择相关错误
/// - 2000-2999: 注册中心相关错误
/// - 3000-3999: 端点/数据相关错误
/// - 6000-6999: 系统/配置相关错误
/// - 9000-9999: 通用错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 节点选择相关错误 (1000-1999)
    // ============================================================
    NoAvailableNode = 1000,
    BalancerNotFound = 1001,

    // ============================================================
    // 注册中心相关错误 (2000-2999)
    // ============================================================
    RegistryUnavailable = 2000,
    RegistryRequestFailed = 2001,
    WatcherStopped = 2002,

    // ============================================================
    // 端点/数据相关错误 (3000-3999)
    // ============================================================
    InvalidEndpoint = 3000,
    SerializationError = 3001,

    // ============================================================
    // 系统/配置相关错误 (6000-6999)
    // ============================================================
    ConfigurationError = 6000,

    // ============================================================
    // 通用错误 (9000-9999)
    // ============================================================
    OperationCancelled = 9000,
    OperationTimeout = 9001,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoAvailableNode => "NO_AVAILABLE_NODE",
            ErrorCode::BalancerNotFound => "BALANCER_NOT_FOUND",
            ErrorCode::RegistryUnavailable => "REGISTRY_UNAVAILABLE",
            ErrorCode::RegistryRequestFailed => "REGISTRY_REQUEST_FAILED",
            ErrorCode::WatcherStopped => "WATCHER_STOPPED",
            ErrorCode::InvalidEndpoint => "INVALID_ENDPOINT",
            ErrorCode::SerializationError => "SERIALIZATION_ERROR",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::OperationCancelled => "OPERATION_CANCELLED",
            ErrorCode::OperationTimeout => "OPERATION_TIMEOUT",
        }
    }

    /// 获取错误代码的类别
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Selection,
            2000..=2999 => ErrorCategory::Registry,
            3000..=3999 => ErrorCategory::Data,
            6000..=6999 => ErrorCategory::Configuration,
            _ => ErrorCategory::General,
        }
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::NoAvailableNode
                | ErrorCode::RegistryUnavailable
                | ErrorCode::RegistryRequestFailed
                | ErrorCode::OperationTimeout
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Selection,
    Registry,
    Data,
    Configuration,
    General,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Selection => write!(f, "SELECTION"),
            ErrorCategory::Registry => write!(f, "REGISTRY"),
            ErrorCategory::Data => write!(f, "DATA"),
            ErrorCategory::Configuration => write!(f, "CONFIGURATION"),
            ErrorCategory::General => write!(f, "GENERAL"),
        }
    }
}
