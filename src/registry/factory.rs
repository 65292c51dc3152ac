//! 注册中心工厂
//!
//! 根据配置选择后端，返回同时实现注册与发现的对象。

use std::sync::Arc;
use tracing::info;

use crate::config::{BackendType, RegistryConfig};
use crate::error::Result;
use crate::registry::ServiceRegistry;

/// 从配置创建注册中心
///
/// 对应后端的 feature 未启用时返回配置错误。
pub async fn create_registry(config: &RegistryConfig) -> Result<Arc<dyn ServiceRegistry>> {
    info!(backend = ?config.registry_type, "Creating service registry");
    match config.registry_type {
        BackendType::Etcd => create_etcd(config).await,
        BackendType::Consul => create_consul(config),
    }
}

#[cfg(feature = "etcd")]
async fn create_etcd(config: &RegistryConfig) -> Result<Arc<dyn ServiceRegistry>> {
    let registry = crate::registry::etcd::EtcdRegistry::connect(config.etcd.clone()).await?;
    Ok(Arc::new(registry))
}

#[cfg(not(feature = "etcd"))]
async fn create_etcd(_config: &RegistryConfig) -> Result<Arc<dyn ServiceRegistry>> {
    Err(crate::error::DiscoveryError::config("etcd backend is not enabled (feature `etcd`)"))
}

#[cfg(feature = "consul")]
fn create_consul(config: &RegistryConfig) -> Result<Arc<dyn ServiceRegistry>> {
    let registry = crate::registry::consul::ConsulRegistry::from_config(config.consul.clone());
    Ok(Arc::new(registry))
}

#[cfg(not(feature = "consul"))]
fn create_consul(_config: &RegistryConfig) -> Result<Arc<dyn ServiceRegistry>> {
    Err(crate::error::DiscoveryError::config("consul backend is not enabled (feature `consul`)"))
}
