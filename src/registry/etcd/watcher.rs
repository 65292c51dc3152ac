//! etcd 前缀 watcher
//!
//! 每次变更通知都重新读取整个前缀，而不是增量应用事件；
//! watch 流断开后等待一小段时间重建，再返回最新列表。

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::client::{EtcdClient, WatchEventStream};
use super::decode_instances;
use crate::error::{DiscoveryError, Result};
use crate::registry::{ServiceInstance, Watcher};

struct WatchState {
    first: bool,
    events: Option<WatchEventStream>,
}

pub struct EtcdWatcher {
    client: Arc<dyn EtcdClient>,
    prefix: String,
    service: String,
    resume_delay: Duration,
    cancel: CancellationToken,
    state: Mutex<WatchState>,
}

impl EtcdWatcher {
    pub(crate) async fn new(
        client: Arc<dyn EtcdClient>,
        prefix: String,
        service: String,
        resume_delay: Duration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let events = client.watch_prefix(&prefix).await?;
        Ok(Self {
            client,
            prefix,
            service,
            resume_delay,
            cancel,
            state: Mutex::new(WatchState {
                first: true,
                events: Some(events),
            }),
        })
    }

    async fn list(&self) -> Result<Vec<ServiceInstance>> {
        let values = self.client.get_prefix(&self.prefix).await?;
        decode_instances(&values)
    }

    /// 等待 `resume_delay` 后重建 watch；重建失败时保留空流，下一次 `next` 会再试
    async fn rewatch(&self, state: &mut WatchState) -> Result<()> {
        state.events = None;
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(DiscoveryError::Cancelled),
            _ = tokio::time::sleep(self.resume_delay) => {}
        }
        match self.client.watch_prefix(&self.prefix).await {
            Ok(events) => {
                debug!(service = %self.service, "Watch stream re-established");
                state.events = Some(events);
            }
            Err(e) => {
                warn!(service = %self.service, error = %e, "Failed to re-establish watch stream");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Watcher for EtcdWatcher {
    async fn next(&self) -> Result<Vec<ServiceInstance>> {
        if self.cancel.is_cancelled() {
            return Err(DiscoveryError::WatcherStopped);
        }

        let mut state = self.state.lock().await;
        if state.first {
            state.first = false;
            return self.list().await;
        }

        let event = match state.events.as_mut() {
            Some(events) => tokio::select! {
                _ = self.cancel.cancelled() => return Err(DiscoveryError::Cancelled),
                event = events.next() => event,
            },
            None => None,
        };

        match event {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!(service = %self.service, error = %e, "Watch stream failed, resuming");
                self.rewatch(&mut state).await?;
            }
            None => {
                warn!(service = %self.service, "Watch stream closed, resuming");
                self.rewatch(&mut state).await?;
            }
        }

        self.list().await
    }

    async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }
}
