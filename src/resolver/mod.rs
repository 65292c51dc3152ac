//! 传输层解析器
//!
//! 解析器持有注册中心的 watcher，把实例列表翻译成节点交给选择器。
//! 两种传输共享同一条更新路径和后台 watch 循环。

#[cfg(feature = "grpc")]
pub mod grpc;
pub mod http;
pub mod target;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::endpoint;
use crate::error::{DiscoveryError, Result};
use crate::registry::{ServiceInstance, Watcher};
use crate::selector::{Node, Selector};
pub use self::http::HttpResolver;
pub use target::{Target, parse_target};

/// 把实例翻译成节点
///
/// 只取 scheme 匹配（按是否加密）的端点；端点格式错误的实例被跳过，
/// 状态为不健康的实例不参与选择。
pub fn build_nodes(instances: &[ServiceInstance], base_scheme: &str, secure: bool) -> Vec<Node> {
    let scheme = endpoint::scheme(base_scheme, secure);
    let mut nodes = Vec::with_capacity(instances.len());

    for instance in instances {
        if !instance.is_healthy() {
            debug!(service = %instance.name, instance_id = %instance.id, "Skipping unhealthy instance");
            continue;
        }
        match endpoint::parse_endpoint(&instance.endpoints, &scheme) {
            Ok(Some(address)) => nodes.push(Node::new(scheme.clone(), address, instance)),
            Ok(None) => {
                debug!(
                    service = %instance.name,
                    instance_id = %instance.id,
                    scheme = %scheme,
                    "Instance has no matching endpoint"
                );
            }
            Err(e) => {
                warn!(
                    service = %instance.name,
                    instance_id = %instance.id,
                    error = %e,
                    "Skipping instance with malformed endpoint"
                );
            }
        }
    }
    nodes
}

/// 翻译并写入选择器；翻译结果为空时保留旧节点，返回 `false`
pub fn apply_update(
    selector: &dyn Selector,
    instances: &[ServiceInstance],
    base_scheme: &str,
    secure: bool,
) -> bool {
    let nodes = build_nodes(instances, base_scheme, secure);
    if nodes.is_empty() {
        warn!(
            instances = instances.len(),
            "Zero endpoint found, refused to write, keeping previous nodes"
        );
        return false;
    }
    selector.store(nodes);
    true
}

/// watcher 结果的消费方
#[async_trait]
pub(crate) trait UpdateSink: Send + Sync {
    /// 返回是否真正写入了新节点
    async fn on_update(&self, instances: Vec<ServiceInstance>) -> bool;
}

/// 阻塞等待第一次有效更新，超时或出错时停止 watcher
pub(crate) async fn resolve_first(
    watcher: &Arc<dyn Watcher>,
    sink: &dyn UpdateSink,
    timeout: Duration,
) -> Result<()> {
    let first = tokio::time::timeout(timeout, async {
        loop {
            let instances = watcher.next().await?;
            if sink.on_update(instances).await {
                return Ok::<(), DiscoveryError>(());
            }
        }
    })
    .await;

    let err = match first {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => e,
        Err(_) => DiscoveryError::Timeout,
    };
    if let Err(e) = watcher.stop().await {
        warn!(error = %e, "Failed to stop watcher");
    }
    Err(err)
}

/// 后台 watch 循环：出错时记录并在 `retry_delay` 后重试，取消时停止 watcher 退出
pub(crate) async fn watch_loop(
    service: String,
    watcher: Arc<dyn Watcher>,
    sink: Arc<dyn UpdateSink>,
    retry_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = watcher.next() => next,
        };
        match next {
            Ok(instances) => {
                sink.on_update(instances).await;
            }
            Err(e) if e.is_cancelled() => break,
            Err(e) => {
                warn!(service = %service, error = %e, "Failed to watch discovery endpoint");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        }
    }

    if let Err(e) = watcher.stop().await {
        warn!(service = %service, error = %e, "Failed to stop watcher");
    }
    info!(service = %service, "🛑 Resolver watch loop stopped");
}
