//! etcd 服务注册发现实现（租约 + 心跳）
//!
//! 实例写入 `{prefix}/{name}/{id}`，绑定 TTL 租约并由后台心跳任务续期。

pub mod client;
mod heartbeat;
pub mod watcher;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::EtcdConfig;
use crate::error::Result;
use crate::registry::{Discovery, Registrar, ServiceInstance, Watcher};
pub use client::EtcdClient;
use heartbeat::{Heartbeat, register_with_kv};
pub use watcher::EtcdWatcher;

struct Registration {
    lease_id: Arc<AtomicI64>,
    value: Arc<ArcSwap<Vec<u8>>>,
    cancel: CancellationToken,
}

/// etcd 服务注册发现
pub struct EtcdRegistry {
    client: Arc<dyn EtcdClient>,
    config: EtcdConfig,
    registrations: Mutex<HashMap<String, Registration>>,
    /// 串行化 register / deregister，避免同一 key 的心跳被覆盖后遗留
    lifecycle: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

impl EtcdRegistry {
    /// 使用已有客户端创建注册中心
    pub fn new(client: Arc<dyn EtcdClient>, config: EtcdConfig) -> Self {
        Self {
            client,
            config,
            registrations: Mutex::new(HashMap::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    /// 连接配置中的 etcd 端点并创建注册中心
    pub async fn connect(config: EtcdConfig) -> Result<Self> {
        let client = etcd_client::Client::connect(&config.endpoints, None).await?;
        info!(endpoints = ?config.endpoints, prefix = %config.prefix, "Connected to etcd");
        Ok(Self::new(Arc::new(client), config))
    }

    pub fn config(&self) -> &EtcdConfig {
        &self.config
    }

    fn service_key(&self, name: &str, id: &str) -> String {
        format!("{}/{}/{}", self.config.prefix, name, id)
    }

    /// 以 `/` 结尾，避免 `svc` 的前缀匹配到 `svc2`
    fn service_prefix(&self, name: &str) -> String {
        format!("{}/{}/", self.config.prefix, name)
    }

    /// 当前某个 key 持有的租约（测试与诊断用）
    pub fn lease_of(&self, instance: &ServiceInstance) -> Option<i64> {
        let key = self.service_key(&instance.name, &instance.id);
        self.registrations
            .lock()
            .get(&key)
            .map(|r| r.lease_id.load(Ordering::Acquire))
    }

    /// 停止所有心跳任务和 watcher；已发布的 key 随租约过期
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    fn spawn_heartbeat(&self, key: String, registration: &Registration) {
        let heartbeat = Heartbeat {
            client: self.client.clone(),
            key,
            value: registration.value.clone(),
            lease_id: registration.lease_id.clone(),
            ttl: self.config.ttl(),
            max_retry: self.config.max_retry,
            register_timeout: self.config.register_timeout(),
            backoff_base: self.config.retry_backoff(),
            max_backoff: self.config.max_backoff(),
            cancel: registration.cancel.clone(),
        };
        tokio::spawn(heartbeat.run());
    }
}

/// 反序列化前缀下的所有实例；任一条目格式错误即返回错误
pub(crate) fn decode_instances(values: &[Vec<u8>]) -> Result<Vec<ServiceInstance>> {
    values
        .iter()
        .map(|v| serde_json::from_slice::<ServiceInstance>(v).map_err(Into::into))
        .collect()
}

#[async_trait]
impl Registrar for EtcdRegistry {
    async fn register(&self, instance: &ServiceInstance) -> Result<()> {
        let key = self.service_key(&instance.name, &instance.id);
        let value = serde_json::to_vec(instance)?;
        let _guard = self.lifecycle.lock().await;

        // 先在新租约下写入；失败时旧的注册与心跳保持不变
        let lease_id = register_with_kv(self.client.as_ref(), &key, value.clone(), self.config.ttl()).await?;

        let registration = Registration {
            lease_id: Arc::new(AtomicI64::new(lease_id)),
            value: Arc::new(ArcSwap::from_pointee(value)),
            cancel: self.shutdown.child_token(),
        };
        self.spawn_heartbeat(key.clone(), &registration);
        let previous = self.registrations.lock().insert(key.clone(), registration);

        // 重复注册时替换旧的心跳，key 已绑定到新租约，撤销旧租约不会删除它
        if let Some(previous) = previous {
            previous.cancel.cancel();
            let old_lease = previous.lease_id.load(Ordering::Acquire);
            if old_lease != lease_id {
                if let Err(e) = self.client.revoke_lease(old_lease).await {
                    debug!(key = %key, lease_id = old_lease, error = %e, "Failed to revoke previous lease");
                }
            }
        }

        info!(
            service = %instance.name,
            instance_id = %instance.id,
            key = %key,
            lease_id,
            "✅ Service registered"
        );
        Ok(())
    }

    async fn update(&self, instance: &ServiceInstance) -> Result<()> {
        let key = self.service_key(&instance.name, &instance.id);
        let value = serde_json::to_vec(instance)?;

        let lease_id = {
            let registrations = self.registrations.lock();
            registrations.get(&key).map(|r| {
                r.value.store(Arc::new(value.clone()));
                r.lease_id.load(Ordering::Acquire)
            })
        };

        self.client.put_kv(&key, value, lease_id).await?;
        debug!(key = %key, lease_id = ?lease_id, "Service updated");
        Ok(())
    }

    async fn deregister(&self, instance: &ServiceInstance) -> Result<()> {
        let key = self.service_key(&instance.name, &instance.id);
        let _guard = self.lifecycle.lock().await;

        let registration = self.registrations.lock().remove(&key);
        if let Some(registration) = &registration {
            registration.cancel.cancel();
        }

        self.client.delete_key(&key).await?;

        if let Some(registration) = registration {
            let lease_id = registration.lease_id.load(Ordering::Acquire);
            if let Err(e) = self.client.revoke_lease(lease_id).await {
                debug!(key = %key, lease_id, error = %e, "Failed to revoke lease");
            }
        }

        info!(service = %instance.name, instance_id = %instance.id, "✅ Service deregistered");
        Ok(())
    }
}

#[async_trait]
impl Discovery for EtcdRegistry {
    async fn get_service(&self, name: &str) -> Result<Vec<ServiceInstance>> {
        let values = self.client.get_prefix(&self.service_prefix(name)).await?;
        decode_instances(&values)
    }

    async fn watch(&self, name: &str) -> Result<Arc<dyn Watcher>> {
        let watcher = EtcdWatcher::new(
            self.client.clone(),
            self.service_prefix(name),
            name.to_string(),
            self.config.watch_resume_delay(),
            self.shutdown.child_token(),
        )
        .await?;
        Ok(Arc::new(watcher))
    }
}

impl Drop for EtcdRegistry {
    fn drop(&mut self) {
        if !self.shutdown.is_cancelled() {
            debug!(prefix = %self.config.prefix, "EtcdRegistry dropped, stopping heartbeats");
        }
        self.shutdown.cancel();
    }
}
