//! 命名服务客户端抽象与 Consul 实现
//!
//! 订阅接口以回调形式推送变化；Consul 没有原生推送，这里用 blocking query
//! 长轮询模拟：`X-Consul-Index` 前进时触发回调。

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ConsulConfig;
use crate::error::{DiscoveryError, Result};

/// 命名服务中的一条实例记录（每个端点一条）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingInstance {
    pub id: String,
    pub service: String,
    pub ip: String,
    pub port: u16,
    pub weight: u32,
    pub healthy: bool,
    pub metadata: HashMap<String, String>,
}

pub type SubscriptionId = u64;

/// 订阅回调，参数为最新的实例列表
pub type SubscribeCallback = Arc<dyn Fn(&[NamingInstance]) + Send + Sync>;

/// 命名服务客户端
#[async_trait]
pub trait NamingClient: Send + Sync + 'static {
    async fn register_instance(&self, instance: &NamingInstance) -> Result<()>;

    async fn update_instance(&self, instance: &NamingInstance) -> Result<()>;

    /// 注销实例；实例不存在不报错
    async fn deregister_instance(&self, service: &str, id: &str) -> Result<()>;

    /// 立即拉取实例列表
    async fn select_instances(&self, service: &str, healthy_only: bool) -> Result<Vec<NamingInstance>>;

    async fn subscribe(&self, service: &str, callback: SubscribeCallback) -> Result<SubscriptionId>;

    /// 取消订阅；未知 ID 不报错
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    #[serde(default)]
    node: Option<CatalogNode>,
    service: AgentService,
    #[serde(default)]
    checks: Vec<HealthCheck>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CatalogNode {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    service: String,
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    meta: Option<HashMap<String, String>>,
    #[serde(default)]
    weights: Option<ServiceWeights>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceWeights {
    passing: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthCheck {
    status: String,
}

impl HealthEntry {
    fn into_instance(self) -> NamingInstance {
        let healthy = self.checks.iter().all(|c| c.status == "passing");
        let ip = if self.service.address.is_empty() {
            self.node.map(|n| n.address).unwrap_or_default()
        } else {
            self.service.address
        };
        NamingInstance {
            id: self.service.id,
            service: self.service.service,
            ip,
            port: self.service.port,
            weight: self.service.weights.map(|w| w.passing).unwrap_or(1),
            healthy,
            metadata: self.service.meta.unwrap_or_default(),
        }
    }
}

/// 基于 Consul agent HTTP API 的命名服务客户端
pub struct ConsulClient {
    http: reqwest::Client,
    address: String,
    wait: Duration,
    retry_delay: Duration,
    next_id: AtomicU64,
    subscriptions: Mutex<HashMap<SubscriptionId, CancellationToken>>,
    shutdown: CancellationToken,
}

impl ConsulClient {
    pub fn new(config: &ConsulConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            address: config.address.trim_end_matches('/').to_string(),
            wait: Duration::from_secs(config.wait_secs),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            next_id: AtomicU64::new(1),
            subscriptions: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    async fn put_service(&self, instance: &NamingInstance) -> Result<()> {
        let url = format!("{}/v1/agent/service/register", self.address);
        let payload = serde_json::json!({
            "ID": instance.id,
            "Name": instance.service,
            "Address": instance.ip,
            "Port": instance.port,
            "Meta": instance.metadata,
            "Weights": { "Passing": instance.weight.max(1), "Warning": 1 },
        });
        self.http
            .put(&url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// 根据响应中的 `X-Consul-Index` 计算下一次 blocking query 的 index
///
/// index 回退说明 Consul 状态被重置，从 1 重新开始；index 为 0 时查询不会阻塞，所以至少为 1。
pub fn next_index(current: u64, reported: u64) -> u64 {
    if reported < current { 1 } else { reported.max(1) }
}

/// 执行一次 blocking query，返回 `(X-Consul-Index, 实例列表)`
async fn blocking_query(
    http: &reqwest::Client,
    address: &str,
    service: &str,
    index: u64,
    wait: Duration,
    passing_only: bool,
) -> Result<(u64, Vec<NamingInstance>)> {
    let url = format!("{}/v1/health/service/{}", address, service);
    let mut query = vec![("index", index.to_string()), ("wait", format!("{}s", wait.as_secs()))];
    if passing_only {
        query.push(("passing", "true".to_string()));
    }

    let resp = http
        .get(&url)
        .query(&query)
        .timeout(wait + Duration::from_secs(5))
        .send()
        .await?
        .error_for_status()?;

    let new_index = resp
        .headers()
        .get("X-Consul-Index")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(index);
    let entries: Vec<HealthEntry> = resp.json().await?;

    Ok((new_index, entries.into_iter().map(HealthEntry::into_instance).collect()))
}

#[async_trait]
impl NamingClient for ConsulClient {
    async fn register_instance(&self, instance: &NamingInstance) -> Result<()> {
        self.put_service(instance).await
    }

    async fn update_instance(&self, instance: &NamingInstance) -> Result<()> {
        // agent 注册接口是 upsert
        self.put_service(instance).await
    }

    async fn deregister_instance(&self, _service: &str, id: &str) -> Result<()> {
        let url = format!("{}/v1/agent/service/deregister/{}", self.address, id);
        let resp = self.http.put(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(instance_id = %id, "Instance already deregistered");
            return Ok(());
        }
        resp.error_for_status()?;
        Ok(())
    }

    async fn select_instances(&self, service: &str, healthy_only: bool) -> Result<Vec<NamingInstance>> {
        let url = format!("{}/v1/health/service/{}", self.address, service);
        let mut request = self.http.get(&url);
        if healthy_only {
            request = request.query(&[("passing", "true")]);
        }
        let entries: Vec<HealthEntry> = request.send().await?.error_for_status()?.json().await?;
        Ok(entries.into_iter().map(HealthEntry::into_instance).collect())
    }

    async fn subscribe(&self, service: &str, callback: SubscribeCallback) -> Result<SubscriptionId> {
        if self.shutdown.is_cancelled() {
            return Err(DiscoveryError::backend("consul client closed"));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();
        self.subscriptions.lock().insert(id, cancel.clone());

        let http = self.http.clone();
        let address = self.address.clone();
        let service = service.to_string();
        let wait = self.wait;
        let retry_delay = self.retry_delay;

        tokio::spawn(async move {
            let mut index = 0u64;
            loop {
                let polled = tokio::select! {
                    _ = cancel.cancelled() => break,
                    res = blocking_query(&http, &address, &service, index, wait, false) => res,
                };
                match polled {
                    Ok((new_index, instances)) => {
                        if new_index != index {
                            callback(&instances);
                        }
                        index = next_index(index, new_index);
                    }
                    Err(e) => {
                        warn!(service = %service, error = %e, "Consul subscription poll failed");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(retry_delay) => {}
                        }
                    }
                }
            }
            debug!(service = %service, subscription = id, "Consul subscription stopped");
        });

        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        if let Some(cancel) = self.subscriptions.lock().remove(&id) {
            cancel.cancel();
        }
        Ok(())
    }
}

impl Drop for ConsulClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
