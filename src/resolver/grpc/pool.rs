//! 子连接池
//!
//! 按地址维护子连接，状态为 `Ready` 或 `TransientFailure`。
//! 每次状态变化都用就绪的子连接重建 picker；失败的子连接由重连任务周期性重拨。

use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use super::picker::{Picker, PickerBuilder};
use crate::error::{DiscoveryError, Result};
use crate::selector::Node;

/// 拨号器
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Clone + Send + Sync + 'static;

    async fn connect(&self, node: &Node) -> Result<Self::Conn>;
}

/// 基于 tonic `Endpoint` 的拨号器
#[derive(Debug, Clone)]
pub struct TonicConnector {
    dial_timeout: Duration,
}

impl TonicConnector {
    pub fn new(dial_timeout: Duration) -> Self {
        Self { dial_timeout }
    }
}

#[async_trait]
impl Connector for TonicConnector {
    type Conn = Channel;

    async fn connect(&self, node: &Node) -> Result<Channel> {
        let scheme = if node.scheme.ends_with('s') { "https" } else { "http" };
        let uri = format!("{}://{}", scheme, node.address);
        let endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| DiscoveryError::invalid_endpoint(uri.as_str(), e.to_string()))?
            .connect_timeout(self.dial_timeout);

        let channel = tokio::time::timeout(self.dial_timeout, endpoint.connect())
            .await
            .map_err(|_| DiscoveryError::Timeout)?
            .map_err(|e| DiscoveryError::backend(format!("failed to connect {}: {}", uri, e)))?;
        Ok(channel)
    }
}

#[derive(Clone)]
pub enum SubConnState<C> {
    Ready(C),
    TransientFailure,
}

impl<C> SubConnState<C> {
    pub fn is_ready(&self) -> bool {
        matches!(self, SubConnState::Ready(_))
    }
}

struct SubConn<C> {
    node: Node,
    state: SubConnState<C>,
}

pub struct SubConnPool<K: Connector> {
    connector: Arc<K>,
    picker_builder: PickerBuilder,
    subconns: Mutex<HashMap<String, SubConn<K::Conn>>>,
    picker: ArcSwap<Picker<K::Conn>>,
}

impl<K: Connector> SubConnPool<K> {
    pub fn new(connector: K, picker_builder: PickerBuilder) -> Self {
        let picker = picker_builder.build(Vec::new());
        Self {
            connector: Arc::new(connector),
            picker_builder,
            subconns: Mutex::new(HashMap::new()),
            picker: ArcSwap::from_pointee(picker),
        }
    }

    /// 当前 picker
    pub fn picker(&self) -> Arc<Picker<K::Conn>> {
        self.picker.load_full()
    }

    async fn dial(&self, node: &Node) -> SubConnState<K::Conn> {
        match self.connector.connect(node).await {
            Ok(conn) => {
                debug!(address = %node.address, "Sub connection ready");
                SubConnState::Ready(conn)
            }
            Err(e) => {
                warn!(address = %node.address, error = %e, "Sub connection failed");
                SubConnState::TransientFailure
            }
        }
    }

    fn rebuild(&self, subconns: &HashMap<String, SubConn<K::Conn>>) {
        let ready: Vec<(Node, K::Conn)> = subconns
            .values()
            .filter_map(|sc| match &sc.state {
                SubConnState::Ready(conn) => Some((sc.node.clone(), conn.clone())),
                SubConnState::TransientFailure => None,
            })
            .collect();
        debug!(ready = ready.len(), total = subconns.len(), "Picker rebuilt");
        self.picker.store(Arc::new(self.picker_builder.build(ready)));
    }

    /// 用新的节点列表更新连接池；空列表保持连接池不变，返回 `false`
    pub async fn update(&self, nodes: Vec<Node>) -> bool {
        if nodes.is_empty() {
            warn!("Zero endpoint found, refused to write, keeping previous sub connections");
            return false;
        }

        let mut subconns = self.subconns.lock().await;
        let mut next: HashMap<String, SubConn<K::Conn>> = HashMap::with_capacity(nodes.len());
        let mut to_dial = Vec::new();

        for node in nodes {
            match subconns.remove(&node.address) {
                Some(existing) => {
                    next.insert(
                        node.address.clone(),
                        SubConn {
                            node,
                            state: existing.state,
                        },
                    );
                }
                None => to_dial.push(node),
            }
        }

        let dialed = futures::future::join_all(to_dial.iter().map(|n| self.dial(n))).await;
        for (node, state) in to_dial.into_iter().zip(dialed) {
            next.insert(node.address.clone(), SubConn { node, state });
        }

        for address in subconns.keys() {
            info!(address = %address, "Sub connection removed");
        }
        *subconns = next;
        self.rebuild(&subconns);
        true
    }

    /// 重拨所有失败的子连接，有变化时重建 picker
    pub async fn reconnect(&self) {
        let mut subconns = self.subconns.lock().await;
        let failed: Vec<Node> = subconns
            .values()
            .filter(|sc| !sc.state.is_ready())
            .map(|sc| sc.node.clone())
            .collect();
        if failed.is_empty() {
            return;
        }

        let mut changed = false;
        for node in failed {
            if let SubConnState::Ready(conn) = self.dial(&node).await {
                if let Some(sc) = subconns.get_mut(&node.address) {
                    sc.state = SubConnState::Ready(conn);
                    changed = true;
                }
            }
        }
        if changed {
            self.rebuild(&subconns);
        }
    }

    /// 标记某个子连接失败（例如调用方观察到连接断开）
    pub async fn mark_failed(&self, address: &str) {
        let mut subconns = self.subconns.lock().await;
        if let Some(sc) = subconns.get_mut(address) {
            if sc.state.is_ready() {
                sc.state = SubConnState::TransientFailure;
                self.rebuild(&subconns);
            }
        }
    }

    /// 就绪子连接的地址（有序）
    pub async fn ready_addresses(&self) -> Vec<String> {
        let subconns = self.subconns.lock().await;
        let mut addrs: Vec<String> = subconns
            .iter()
            .filter(|(_, sc)| sc.state.is_ready())
            .map(|(addr, _)| addr.clone())
            .collect();
        addrs.sort();
        addrs
    }

    /// 全部子连接数量
    pub async fn len(&self) -> usize {
        self.subconns.lock().await.len()
    }
}
