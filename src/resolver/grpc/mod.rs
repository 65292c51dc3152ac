//! gRPC 解析器
//!
//! 注册中心的变化驱动子连接池；连接池每次变化都重建 picker，
//! `BalancedChannel` 在每次调用时从当前 picker 选择子连接。

pub mod channel;
pub mod picker;
pub mod pool;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::target::{Target, parse_target};
use super::{UpdateSink, build_nodes, resolve_first, watch_loop};
use crate::config::ResolverConfig;
use crate::endpoint;
use crate::error::{DiscoveryError, Result};
use crate::registry::{Discovery, ServiceInstance};
use crate::selector::{Node, SelectOptions, SelectorBuilder};
pub use channel::BalancedChannel;
pub use picker::{PickResult, Picker, PickerBuilder};
pub use pool::{Connector, SubConnPool, SubConnState, TonicConnector};

const GRPC_SCHEME: &str = "grpc";

struct PoolSink<K: Connector> {
    pool: Arc<SubConnPool<K>>,
    secure: bool,
}

#[async_trait]
impl<K: Connector> UpdateSink for PoolSink<K> {
    async fn on_update(&self, instances: Vec<ServiceInstance>) -> bool {
        let nodes = build_nodes(&instances, GRPC_SCHEME, self.secure);
        self.pool.update(nodes).await
    }
}

async fn reconnect_loop<K: Connector>(pool: Arc<SubConnPool<K>>, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every.max(Duration::from_millis(10)));
    // 第一次 tick 立即触发，跳过
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => pool.reconnect().await,
        }
    }
    debug!("Sub connection reconnect loop stopped");
}

/// gRPC 客户端使用的解析器
pub struct GrpcResolver<K: Connector = TonicConnector> {
    target: String,
    pool: Arc<SubConnPool<K>>,
    cancel: CancellationToken,
}

impl GrpcResolver<TonicConnector> {
    /// 使用 tonic 拨号器构建解析器
    pub async fn new(
        target: &str,
        discovery: Option<Arc<dyn Discovery>>,
        config: &ResolverConfig,
    ) -> Result<Self> {
        let connector = TonicConnector::new(config.dial_timeout());
        Self::with_connector(target, discovery, connector, config).await
    }

    /// 负载均衡通道，可交给 tonic 生成的客户端
    pub fn channel(&self) -> BalancedChannel {
        BalancedChannel::new(self.pool.clone())
    }
}

impl<K: Connector> GrpcResolver<K> {
    pub async fn with_connector(
        target: &str,
        discovery: Option<Arc<dyn Discovery>>,
        connector: K,
        config: &ResolverConfig,
    ) -> Result<Self> {
        let selector_builder = SelectorBuilder::try_new(&config.balancer)?;
        let pool = Arc::new(SubConnPool::new(connector, PickerBuilder::new(selector_builder)));
        let secure = !config.insecure;
        let cancel = CancellationToken::new();

        match parse_target(target)? {
            Target::Direct(addrs) => {
                let scheme = endpoint::scheme(GRPC_SCHEME, secure);
                let nodes: Vec<Node> = addrs.into_iter().map(|a| Node::direct(scheme.clone(), a)).collect();
                pool.update(nodes).await;
            }
            Target::Discovery { service, .. } => {
                let discovery = discovery.ok_or_else(|| {
                    DiscoveryError::config(format!("target {} requires a discovery", target))
                })?;
                let watcher = discovery.watch(&service).await?;
                let sink: Arc<dyn UpdateSink> = Arc::new(PoolSink {
                    pool: pool.clone(),
                    secure,
                });

                if config.block {
                    resolve_first(&watcher, sink.as_ref(), config.timeout()).await?;
                    if pool.picker().is_empty() {
                        warn!(service = %service, "No sub connection is ready after first resolve");
                    }
                }

                tokio::spawn(watch_loop(
                    service.clone(),
                    watcher,
                    sink,
                    config.retry_delay(),
                    cancel.clone(),
                ));
                info!(service = %service, balancer = %config.balancer, "gRPC resolver started");
            }
        }

        tokio::spawn(reconnect_loop(pool.clone(), config.reconnect_interval(), cancel.clone()));

        Ok(Self {
            target: target.to_string(),
            pool,
            cancel,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn pool(&self) -> &Arc<SubConnPool<K>> {
        &self.pool
    }

    /// 为一次调用选择子连接
    pub fn pick(&self, opts: &SelectOptions) -> Result<PickResult<K::Conn>> {
        self.pool.picker().pick(opts)
    }

    /// 停止后台刷新与重连，可重复调用
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl<K: Connector> Drop for GrpcResolver<K> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
