//! Consul 服务注册发现实现（订阅 + 拉取）
//!
//! 命名服务的记录是扁平的 `ip:port`，一个实例的每个端点单独注册一条记录，
//! ID 为 `{instance_id}-{kind}`；传输类型、版本和状态写进记录的元数据，读取时再还原。

pub mod client;
pub mod watcher;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ConsulConfig;
use crate::endpoint;
use crate::error::{DiscoveryError, Result};
use crate::registry::{Discovery, InstanceState, Registrar, ServiceInstance, Watcher};
pub use client::{ConsulClient, NamingClient, NamingInstance, SubscribeCallback, SubscriptionId};
pub use watcher::ConsulWatcher;

/// 记录元数据中保存端点传输类型的键
pub const META_KIND: &str = "kind";
/// 记录元数据中保存实例版本的键
pub const META_VERSION: &str = "version";
/// 记录元数据中保存实例状态的键
pub const META_STATE: &str = "state";

const META_WEIGHT: &str = "weight";
const DEFAULT_KIND: &str = "grpc";

/// Consul 服务注册发现
pub struct ConsulRegistry {
    client: Arc<dyn NamingClient>,
    config: ConsulConfig,
    shutdown: CancellationToken,
}

impl ConsulRegistry {
    pub fn new(client: Arc<dyn NamingClient>, config: ConsulConfig) -> Self {
        Self {
            client,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// 使用 HTTP 客户端连接配置中的 Consul agent
    pub fn from_config(config: ConsulConfig) -> Self {
        let client = ConsulClient::new(&config);
        info!(address = %config.address, "Using consul registry");
        Self::new(Arc::new(client), config)
    }

    pub fn config(&self) -> &ConsulConfig {
        &self.config
    }

    /// 停止所有 watcher
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    fn to_naming_instances(&self, instance: &ServiceInstance) -> Result<Vec<NamingInstance>> {
        if instance.name.is_empty() {
            return Err(DiscoveryError::config("service name is empty"));
        }
        if instance.endpoints.is_empty() {
            return Err(DiscoveryError::invalid_endpoint(
                instance.id.as_str(),
                "instance has no endpoints",
            ));
        }

        instance
            .endpoints
            .iter()
            .map(|ep| {
                let (kind, host) = endpoint::parse(ep)?;
                let (ip, port) = split_host_port(ep, &host)?;

                let mut metadata = instance.metadata.clone();
                metadata.insert(META_KIND.to_string(), kind.clone());
                metadata.insert(META_VERSION.to_string(), instance.version.clone());
                metadata.insert(META_STATE.to_string(), instance.state.to_string());

                Ok(NamingInstance {
                    id: format!("{}-{}", instance.id, kind),
                    service: instance.name.clone(),
                    ip,
                    port,
                    weight: self.config.weight,
                    healthy: instance.is_healthy(),
                    metadata,
                })
            })
            .collect()
    }
}

fn split_host_port(endpoint: &str, host: &str) -> Result<(String, u16)> {
    let (ip, port) = host
        .rsplit_once(':')
        .ok_or_else(|| DiscoveryError::invalid_endpoint(endpoint, "missing port"))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| DiscoveryError::invalid_endpoint(endpoint, "invalid port"))?;
    let ip = ip.trim_start_matches('[').trim_end_matches(']');
    Ok((ip.to_string(), port))
}

/// 把命名服务记录按原实例 ID 聚合，还原成 `ServiceInstance`
///
/// 派生的元数据键（kind、version、state）会被移除；记录自带的权重在元数据未指定时
/// 写入 `weight`，供节点初始权重使用。
pub(crate) fn to_service_instances(records: Vec<NamingInstance>) -> Vec<ServiceInstance> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, ServiceInstance> = HashMap::new();

    for record in records {
        let mut metadata = record.metadata;
        let kind = metadata
            .remove(META_KIND)
            .unwrap_or_else(|| DEFAULT_KIND.to_string());
        let version = metadata.remove(META_VERSION).unwrap_or_default();
        let mut state = metadata
            .remove(META_STATE)
            .and_then(|s| s.parse::<InstanceState>().ok())
            .unwrap_or_default();
        if !record.healthy {
            state = InstanceState::Unhealthy;
        }
        metadata
            .entry(META_WEIGHT.to_string())
            .or_insert_with(|| record.weight.to_string());

        let suffix = format!("-{}", kind);
        let id = record
            .id
            .strip_suffix(&suffix)
            .unwrap_or(&record.id)
            .to_string();

        let host = if record.ip.contains(':') {
            format!("[{}]:{}", record.ip, record.port)
        } else {
            format!("{}:{}", record.ip, record.port)
        };
        let ep = endpoint::new_endpoint(&kind, &host);

        match grouped.get_mut(&id) {
            Some(existing) => {
                existing.endpoints.push(ep);
                if state == InstanceState::Unhealthy {
                    existing.state = state;
                }
            }
            None => {
                order.push(id.clone());
                grouped.insert(
                    id.clone(),
                    ServiceInstance {
                        id,
                        name: record.service,
                        version,
                        metadata,
                        endpoints: vec![ep],
                        state,
                    },
                );
            }
        }
    }

    order
        .into_iter()
        .filter_map(|id| grouped.remove(&id))
        .collect()
}

#[async_trait]
impl Registrar for ConsulRegistry {
    async fn register(&self, instance: &ServiceInstance) -> Result<()> {
        for record in self.to_naming_instances(instance)? {
            self.client.register_instance(&record).await?;
        }
        info!(
            service = %instance.name,
            instance_id = %instance.id,
            endpoints = instance.endpoints.len(),
            "✅ Service registered"
        );
        Ok(())
    }

    async fn update(&self, instance: &ServiceInstance) -> Result<()> {
        for record in self.to_naming_instances(instance)? {
            self.client.update_instance(&record).await?;
        }
        debug!(service = %instance.name, instance_id = %instance.id, "Service updated");
        Ok(())
    }

    async fn deregister(&self, instance: &ServiceInstance) -> Result<()> {
        for record in self.to_naming_instances(instance)? {
            self.client
                .deregister_instance(&record.service, &record.id)
                .await?;
        }
        info!(service = %instance.name, instance_id = %instance.id, "✅ Service deregistered");
        Ok(())
    }
}

#[async_trait]
impl Discovery for ConsulRegistry {
    async fn get_service(&self, name: &str) -> Result<Vec<ServiceInstance>> {
        let records = self
            .client
            .select_instances(name, self.config.healthy_only)
            .await?;
        Ok(to_service_instances(records))
    }

    async fn watch(&self, name: &str) -> Result<Arc<dyn Watcher>> {
        let watcher = ConsulWatcher::new(
            self.client.clone(),
            name.to_string(),
            self.config.healthy_only,
            self.shutdown.child_token(),
        )
        .await?;
        Ok(Arc::new(watcher))
    }
}

impl Drop for ConsulRegistry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
