//! 服务发现统一错误类型

use super::code::ErrorCode;
use thiserror::Error;

/// 服务发现统一错误类型
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// 过滤后没有可用节点（可重试，对应 "service unavailable"）
    #[error("no available node")]
    NoAvailableNode,

    /// 负载均衡器未注册
    #[error("balancer not registered: {0}")]
    BalancerNotFound(String),

    /// 注册中心瞬时错误（网络、连接中断等）
    #[error("registry backend error: {0}")]
    Backend(String),

    /// etcd 客户端错误
    #[cfg(feature = "etcd")]
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    /// HTTP 客户端错误
    #[cfg(feature = "consul")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// 实例序列化/反序列化失败
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 端点格式错误
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// 配置错误
    #[error("configuration error: {0}")]
    Config(String),

    /// Watcher 已停止
    #[error("watcher stopped")]
    WatcherStopped,

    /// 操作被取消
    #[error("operation cancelled")]
    Cancelled,

    /// 操作超时
    #[error("operation timed out")]
    Timeout,
}

impl DiscoveryError {
    /// 创建注册中心错误
    pub fn backend(msg: impl Into<String>) -> Self {
        DiscoveryError::Backend(msg.into())
    }

    /// 创建配置错误
    pub fn config(msg: impl Into<String>) -> Self {
        DiscoveryError::Config(msg.into())
    }

    /// 创建端点错误
    pub fn invalid_endpoint(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        DiscoveryError::InvalidEndpoint {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            DiscoveryError::NoAvailableNode => ErrorCode::NoAvailableNode,
            DiscoveryError::BalancerNotFound(_) => ErrorCode::BalancerNotFound,
            DiscoveryError::Backend(_) => ErrorCode::RegistryUnavailable,
            #[cfg(feature = "etcd")]
            DiscoveryError::Etcd(_) => ErrorCode::RegistryRequestFailed,
            #[cfg(feature = "consul")]
            DiscoveryError::Http(_) => ErrorCode::RegistryRequestFailed,
            DiscoveryError::Serialization(_) => ErrorCode::SerializationError,
            DiscoveryError::InvalidEndpoint { .. } => ErrorCode::InvalidEndpoint,
            DiscoveryError::Config(_) => ErrorCode::ConfigurationError,
            DiscoveryError::WatcherStopped => ErrorCode::WatcherStopped,
            DiscoveryError::Cancelled => ErrorCode::OperationCancelled,
            DiscoveryError::Timeout => ErrorCode::OperationTimeout,
        }
    }

    /// 判断是否可重试
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// 判断是否为取消/停止类错误（后台循环据此退出）
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            DiscoveryError::Cancelled | DiscoveryError::WatcherStopped
        )
    }
}

#[cfg(feature = "grpc")]
impl From<DiscoveryError> for tonic::Status {
    fn from(err: DiscoveryError) -> Self {
        let message = err.to_string();
        match err.code() {
            ErrorCode::NoAvailableNode
            | ErrorCode::RegistryUnavailable
            | ErrorCode::RegistryRequestFailed => tonic::Status::unavailable(message),
            ErrorCode::OperationTimeout => tonic::Status::deadline_exceeded(message),
            ErrorCode::OperationCancelled | ErrorCode::WatcherStopped => {
                tonic::Status::cancelled(message)
            }
            ErrorCode::InvalidEndpoint | ErrorCode::SerializationError => {
                tonic::Status::internal(message)
            }
            ErrorCode::BalancerNotFound | ErrorCode::ConfigurationError => {
                tonic::Status::failed_precondition(message)
            }
        }
    }
}

/// 服务发现结果类型
pub type Result<T> = std::result::Result<T, DiscoveryError>;
