//! 订阅式 watcher
//!
//! 订阅回调只投递一个"有变化"信号（容量 1，满了就丢弃），`next` 收到信号后再主动拉取，
//! 连续多次变化会被合并成一次拉取。

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::client::{NamingClient, NamingInstance, SubscribeCallback, SubscriptionId};
use super::to_service_instances;
use crate::error::{DiscoveryError, Result};
use crate::registry::{ServiceInstance, Watcher};

pub struct ConsulWatcher {
    client: Arc<dyn NamingClient>,
    service: String,
    healthy_only: bool,
    subscription: SubscriptionId,
    signal: Mutex<mpsc::Receiver<()>>,
    cancel: CancellationToken,
    stopped: AtomicBool,
}

impl ConsulWatcher {
    pub(crate) async fn new(
        client: Arc<dyn NamingClient>,
        service: String,
        healthy_only: bool,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel(1);
        // 预置一个信号，首次 `next` 立即返回当前列表
        let _ = tx.try_send(());

        let callback: SubscribeCallback = Arc::new(move |_: &[NamingInstance]| {
            let _ = tx.try_send(());
        });
        let subscription = client.subscribe(&service, callback).await?;
        debug!(service = %service, subscription, "Subscribed to service changes");

        Ok(Self {
            client,
            service,
            healthy_only,
            subscription,
            signal: Mutex::new(rx),
            cancel,
            stopped: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Watcher for ConsulWatcher {
    async fn next(&self) -> Result<Vec<ServiceInstance>> {
        if self.cancel.is_cancelled() {
            return Err(DiscoveryError::WatcherStopped);
        }

        {
            let mut signal = self.signal.lock().await;
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                s = signal.recv() => {
                    if s.is_none() {
                        return Err(DiscoveryError::WatcherStopped);
                    }
                }
            }
        }

        let records = self
            .client
            .select_instances(&self.service, self.healthy_only)
            .await?;
        Ok(to_service_instances(records))
    }

    async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // 先取消，挂起的 `next` 返回 Cancelled 而不是通道关闭
        self.cancel.cancel();
        self.client.unsubscribe(self.subscription).await
    }
}
