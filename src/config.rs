//! 配置定义
//!
//! 所有字段都带默认值，可直接 `Config::default()` 使用，也可从 TOML 文件加载。

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{DiscoveryError, Result};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// 注册中心后端类型
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    #[default]
    Etcd,
    Consul,
}

impl std::str::FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "etcd" => Ok(BackendType::Etcd),
            "consul" => Ok(BackendType::Consul),
            _ => Err(format!("Unknown backend type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub registry_type: BackendType,
    #[serde(default)]
    pub etcd: EtcdConfig,
    #[serde(default)]
    pub consul: ConsulConfig,
}

/// etcd（租约/心跳）后端配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    /// key 前缀，实例 key 为 `{prefix}/{name}/{id}`
    pub prefix: String,
    /// 租约 TTL（秒）
    pub ttl: u64,
    /// 心跳断开后重新注册的最大次数
    pub max_retry: usize,
    /// 单次重新注册的超时（毫秒）
    pub register_timeout_ms: u64,
    /// 重试退避基数（毫秒），第 n 次失败后的候选退避为 `base * 2^k (k <= n)`
    pub retry_backoff_ms: u64,
    /// 退避上限（毫秒）
    pub max_backoff_ms: u64,
    /// watch 流断开后重建前的等待（毫秒）
    pub watch_resume_delay_ms: u64,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            prefix: "/fox".to_string(),
            ttl: 15,
            max_retry: 5,
            register_timeout_ms: 3_000,
            retry_backoff_ms: 1_000,
            max_backoff_ms: 32_000,
            watch_resume_delay_ms: 1_000,
        }
    }
}

impl EtcdConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    pub fn register_timeout(&self) -> Duration {
        Duration::from_millis(self.register_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn watch_resume_delay(&self) -> Duration {
        Duration::from_millis(self.watch_resume_delay_ms)
    }
}

/// Consul（订阅/拉取）后端配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsulConfig {
    pub address: String,
    /// 注册时写入的权重
    pub weight: u32,
    /// 拉取实例时是否只返回健康实例
    pub healthy_only: bool,
    /// blocking query 的最长等待（秒）
    pub wait_secs: u64,
    /// 订阅轮询出错后的重试间隔（毫秒）
    pub retry_delay_ms: u64,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            weight: 100,
            healthy_only: true,
            wait_secs: 10,
            retry_delay_ms: 1_000,
        }
    }
}

/// 解析器配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// 负载均衡器名称（需已注册）
    pub balancer: String,
    /// 首次阻塞解析的超时（秒）
    pub timeout_secs: u64,
    /// 是否在构造时阻塞等待首个非空快照
    pub block: bool,
    /// 为 true 时选择非加密端点（http/grpc），否则选择 https/grpcs
    pub insecure: bool,
    /// watch 出错后的重试间隔（毫秒）
    pub retry_delay_ms: u64,
    /// gRPC 子连接失败后的重连间隔（毫秒）
    pub reconnect_interval_ms: u64,
    /// gRPC 子连接拨号超时（毫秒）
    pub dial_timeout_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            balancer: crate::selector::balancer::wrr::NAME.to_string(),
            timeout_secs: 10,
            block: true,
            insecure: true,
            retry_delay_ms: 1_000,
            reconnect_interval_ms: 5_000,
            dial_timeout_ms: 3_000,
        }
    }
}

impl ResolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// pretty 或 json
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DiscoveryError::config(format!("failed to read {}: {}", path, e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| DiscoveryError::config(e.to_string()))
    }

    /// 使用 `FOX_*` 环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// 使用给定的查找函数覆盖配置
    ///
    /// 支持的变量：`FOX_REGISTRY_TYPE`、`FOX_ETCD_ENDPOINTS`（逗号分隔）、
    /// `FOX_REGISTRY_PREFIX`、`FOX_REGISTRY_TTL`、`FOX_CONSUL_ADDRESS`、
    /// `FOX_BALANCER`、`FOX_LOG_LEVEL`
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kind) = lookup("FOX_REGISTRY_TYPE").and_then(|v| v.parse().ok()) {
            self.registry.registry_type = kind;
        }
        if let Some(endpoints) = lookup("FOX_ETCD_ENDPOINTS") {
            self.registry.etcd.endpoints = endpoints
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(prefix) = lookup("FOX_REGISTRY_PREFIX") {
            self.registry.etcd.prefix = prefix;
        }
        if let Some(ttl) = lookup("FOX_REGISTRY_TTL").and_then(|v| v.parse().ok()) {
            self.registry.etcd.ttl = ttl;
        }
        if let Some(address) = lookup("FOX_CONSUL_ADDRESS") {
            self.registry.consul.address = address;
        }
        if let Some(balancer) = lookup("FOX_BALANCER") {
            self.resolver.balancer = balancer;
        }
        if let Some(level) = lookup("FOX_LOG_LEVEL") {
            self.log.level = level;
        }
    }
}
