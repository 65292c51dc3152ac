//! 测试用的内存注册中心后端
#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use fox_discovery::error::{DiscoveryError, Result};
use fox_discovery::registry::ServiceInstance;
use fox_discovery::registry::consul::{
    NamingClient, NamingInstance, SubscribeCallback, SubscriptionId,
};
#[cfg(feature = "etcd")]
use fox_discovery::registry::etcd::client::{EtcdClient, KeepAliveStream, WatchEventStream};

/// 轮询直到条件成立或超时
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn instance(id: &str, name: &str, endpoint: &str) -> ServiceInstance {
    ServiceInstance::with_id(id, name)
        .with_version("v1")
        .with_endpoint(endpoint)
}

// ===== etcd =====

#[cfg(feature = "etcd")]
#[derive(Default)]
struct EtcdState {
    kvs: BTreeMap<String, (Vec<u8>, Option<i64>)>,
    leases: HashSet<i64>,
    next_lease: i64,
    grant_calls: usize,
    fail_grants: usize,
    keepalives: Vec<(i64, mpsc::UnboundedSender<Result<i64>>)>,
    watches: Vec<(String, mpsc::UnboundedSender<Result<()>>)>,
}

#[cfg(feature = "etcd")]
impl EtcdState {
    fn notify(&mut self, key: &str) {
        self.watches
            .retain(|(prefix, tx)| !key.starts_with(prefix.as_str()) || tx.send(Ok(())).is_ok());
    }
}

#[cfg(feature = "etcd")]
/// 内存版 etcd
#[derive(Default)]
pub struct MockEtcd {
    state: Mutex<EtcdState>,
}

#[cfg(feature = "etcd")]
impl MockEtcd {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的 `n` 次租约申请失败
    pub fn fail_next_grants(&self, n: usize) {
        self.state.lock().fail_grants = n;
    }

    /// 所有租约过期：删除绑定的 key，关闭续期流
    pub fn expire_all_leases(&self) {
        let mut state = self.state.lock();
        state.leases.clear();
        state.keepalives.clear();
        let expired: Vec<String> = state
            .kvs
            .iter()
            .filter(|(_, (_, lease))| lease.is_some())
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            state.kvs.remove(&key);
            state.notify(&key);
        }
    }

    /// 所有 watch 流先收到一个错误再关闭
    pub fn break_watches(&self) {
        let mut state = self.state.lock();
        for (_, tx) in state.watches.drain(..) {
            let _ = tx.send(Err(DiscoveryError::backend("watch stream broken")));
        }
    }

    pub fn put_raw(&self, key: &str, value: &[u8]) {
        let mut state = self.state.lock();
        state.kvs.insert(key.to_string(), (value.to_vec(), None));
        state.notify(key);
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().kvs.keys().cloned().collect()
    }

    pub fn lease_of_key(&self, key: &str) -> Option<i64> {
        self.state.lock().kvs.get(key).and_then(|(_, lease)| *lease)
    }

    pub fn lease_count(&self) -> usize {
        self.state.lock().leases.len()
    }

    pub fn grant_calls(&self) -> usize {
        self.state.lock().grant_calls
    }

    pub fn watch_count(&self) -> usize {
        self.state.lock().watches.len()
    }
}

#[cfg(feature = "etcd")]
#[async_trait]
impl EtcdClient for MockEtcd {
    async fn grant_lease(&self, _ttl_secs: i64) -> Result<i64> {
        let mut state = self.state.lock();
        state.grant_calls += 1;
        if state.fail_grants > 0 {
            state.fail_grants -= 1;
            return Err(DiscoveryError::backend("etcd unavailable"));
        }
        state.next_lease += 1;
        let id = state.next_lease;
        state.leases.insert(id);
        Ok(id)
    }

    async fn put_kv(&self, key: &str, value: Vec<u8>, lease_id: Option<i64>) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(id) = lease_id {
            if !state.leases.contains(&id) {
                return Err(DiscoveryError::backend(format!("lease {} not found", id)));
            }
        }
        state.kvs.insert(key.to_string(), (value, lease_id));
        state.notify(key);
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<Vec<u8>>> {
        let state = self.state.lock();
        Ok(state
            .kvs
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(_, (v, _))| v.clone())
            .collect())
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.kvs.remove(key).is_some() {
            state.notify(key);
        }
        Ok(())
    }

    async fn revoke_lease(&self, lease_id: i64) -> Result<()> {
        let mut state = self.state.lock();
        if !state.leases.remove(&lease_id) {
            return Err(DiscoveryError::backend(format!("lease {} not found", lease_id)));
        }
        state.keepalives.retain(|(id, _)| *id != lease_id);
        let bound: Vec<String> = state
            .kvs
            .iter()
            .filter(|(_, (_, lease))| *lease == Some(lease_id))
            .map(|(k, _)| k.clone())
            .collect();
        for key in bound {
            state.kvs.remove(&key);
            state.notify(&key);
        }
        Ok(())
    }

    async fn keep_alive_lease(&self, lease_id: i64, _interval: Duration) -> Result<KeepAliveStream> {
        let mut state = self.state.lock();
        if !state.leases.contains(&lease_id) {
            return Err(DiscoveryError::backend(format!("lease {} not found", lease_id)));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(15));
        state.keepalives.push((lease_id, tx));
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchEventStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().watches.push((prefix.to_string(), tx));
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

// ===== naming service =====

#[derive(Default)]
struct NamingState {
    records: BTreeMap<String, NamingInstance>,
    subscriptions: HashMap<SubscriptionId, (String, SubscribeCallback)>,
    next_subscription: SubscriptionId,
    select_calls: usize,
}

/// 内存版命名服务，变化时同步回调订阅者
#[derive(Default)]
pub struct MockNaming {
    state: Mutex<NamingState>,
}

impl MockNaming {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(state: &NamingState, service: &str) -> Vec<NamingInstance> {
        state
            .records
            .values()
            .filter(|r| r.service == service)
            .cloned()
            .collect()
    }

    /// 回调在锁外执行
    pub fn notify(&self, service: &str) {
        let (callbacks, records) = {
            let state = self.state.lock();
            let callbacks: Vec<SubscribeCallback> = state
                .subscriptions
                .values()
                .filter(|(s, _)| s == service)
                .map(|(_, cb)| cb.clone())
                .collect();
            (callbacks, Self::snapshot(&state, service))
        };
        for cb in callbacks {
            cb(&records);
        }
    }

    pub fn set_healthy(&self, id: &str, healthy: bool) {
        let service = {
            let mut state = self.state.lock();
            match state.records.get_mut(id) {
                Some(record) => {
                    record.healthy = healthy;
                    record.service.clone()
                }
                None => return,
            }
        };
        self.notify(&service);
    }

    pub fn record(&self, id: &str) -> Option<NamingInstance> {
        self.state.lock().records.get(id).cloned()
    }

    pub fn record_ids(&self) -> Vec<String> {
        self.state.lock().records.keys().cloned().collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    pub fn select_calls(&self) -> usize {
        self.state.lock().select_calls
    }
}

#[async_trait]
impl NamingClient for MockNaming {
    async fn register_instance(&self, instance: &NamingInstance) -> Result<()> {
        self.state
            .lock()
            .records
            .insert(instance.id.clone(), instance.clone());
        self.notify(&instance.service);
        Ok(())
    }

    async fn update_instance(&self, instance: &NamingInstance) -> Result<()> {
        self.register_instance(instance).await
    }

    async fn deregister_instance(&self, service: &str, id: &str) -> Result<()> {
        let removed = self.state.lock().records.remove(id).is_some();
        if removed {
            self.notify(service);
        }
        Ok(())
    }

    async fn select_instances(&self, service: &str, healthy_only: bool) -> Result<Vec<NamingInstance>> {
        let mut state = self.state.lock();
        state.select_calls += 1;
        Ok(Self::snapshot(&state, service)
            .into_iter()
            .filter(|r| !healthy_only || r.healthy)
            .collect())
    }

    async fn subscribe(&self, service: &str, callback: SubscribeCallback) -> Result<SubscriptionId> {
        let mut state = self.state.lock();
        state.next_subscription += 1;
        let id = state.next_subscription;
        state
            .subscriptions
            .insert(id, (service.to_string(), callback));
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.state.lock().subscriptions.remove(&id);
        Ok(())
    }
}
