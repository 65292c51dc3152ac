//! HTTP 解析器

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::target::{Target, parse_target};
use super::{UpdateSink, apply_update, resolve_first, watch_loop};
use crate::config::ResolverConfig;
use crate::endpoint;
use crate::error::{DiscoveryError, Result};
use crate::registry::{Discovery, ServiceInstance};
use crate::selector::{DefaultSelector, DoneFunc, Node, SelectOptions, Selector, SelectorBuilder};

const HTTP_SCHEME: &str = "http";

struct SelectorSink {
    selector: Arc<DefaultSelector>,
    secure: bool,
}

#[async_trait]
impl UpdateSink for SelectorSink {
    async fn on_update(&self, instances: Vec<ServiceInstance>) -> bool {
        apply_update(self.selector.as_ref(), &instances, HTTP_SCHEME, self.secure)
    }
}

/// HTTP 客户端使用的解析器
///
/// 发现目标由后台任务持续刷新节点；直连目标只在构建时写入一次。
pub struct HttpResolver {
    target: String,
    selector: Arc<DefaultSelector>,
    cancel: CancellationToken,
}

impl HttpResolver {
    /// 构建解析器
    ///
    /// `block` 开启时等待第一次有效的实例列表，最多 `timeout`。
    pub async fn new(
        target: &str,
        discovery: Option<Arc<dyn Discovery>>,
        config: &ResolverConfig,
    ) -> Result<Self> {
        let selector = Arc::new(SelectorBuilder::try_new(&config.balancer)?.build());
        let secure = !config.insecure;
        let cancel = CancellationToken::new();

        match parse_target(target)? {
            Target::Direct(addrs) => {
                let scheme = endpoint::scheme(HTTP_SCHEME, secure);
                selector.store(addrs.into_iter().map(|a| Node::direct(scheme.clone(), a)).collect());
            }
            Target::Discovery { service, .. } => {
                let discovery = discovery.ok_or_else(|| {
                    DiscoveryError::config(format!("target {} requires a discovery", target))
                })?;
                let watcher = discovery.watch(&service).await?;
                let sink: Arc<dyn UpdateSink> = Arc::new(SelectorSink {
                    selector: selector.clone(),
                    secure,
                });

                if config.block {
                    resolve_first(&watcher, sink.as_ref(), config.timeout()).await?;
                }

                tokio::spawn(watch_loop(
                    service.clone(),
                    watcher,
                    sink,
                    config.retry_delay(),
                    cancel.clone(),
                ));
                info!(service = %service, balancer = %config.balancer, "HTTP resolver started");
            }
        }

        Ok(Self {
            target: target.to_string(),
            selector,
            cancel,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn selector(&self) -> &Arc<DefaultSelector> {
        &self.selector
    }

    /// 为一次请求选出节点
    pub fn select(&self, opts: &SelectOptions) -> Result<(Arc<Node>, DoneFunc)> {
        self.selector.select(opts)
    }

    /// 停止后台刷新，可重复调用
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for HttpResolver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
