//! 服务实例定义

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// 实例生命周期状态
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    #[default]
    Healthy,
    Unhealthy,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Healthy => "healthy",
            InstanceState::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InstanceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "healthy" | "up" | "online" => Ok(InstanceState::Healthy),
            "unhealthy" | "down" | "offline" => Ok(InstanceState::Unhealthy),
            _ => Err(format!("Unknown instance state: {}", s)),
        }
    }
}

/// 服务实例
///
/// 一个已注册的进程，可通过一个或多个端点（每种传输一个）对外提供服务。
/// 被解析器读取后视为不可变，更新时整体替换。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceInstance {
    /// 实例 ID（唯一标识）
    pub id: String,

    /// 逻辑服务名
    pub name: String,

    /// 版本
    #[serde(default)]
    pub version: String,

    /// 元数据（`weight` 键会被解析为初始权重）
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// 端点列表，例如 `grpc://127.0.0.1:9000`、`http://127.0.0.1:8000`
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// 生命周期状态
    #[serde(default)]
    pub state: InstanceState,
}

impl ServiceInstance {
    /// 创建新的服务实例，ID 随机生成
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), name)
    }

    /// 使用指定 ID 创建服务实例
    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: String::new(),
            metadata: HashMap::new(),
            endpoints: Vec::new(),
            state: InstanceState::Healthy,
        }
    }

    /// 设置版本
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 添加元数据
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 添加端点
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    /// 设置状态
    pub fn with_state(mut self, state: InstanceState) -> Self {
        self.state = state;
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.state == InstanceState::Healthy
    }
}
