//! 租约心跳任务
//!
//! 状态机：`Alive`（续期流打开）→ 续期流中断 → `Registering`（有限次重新申请租约并写入）
//! → 成功回到 `Alive`；重试耗尽或被取消 → `Stopped`（任务退出，key 随租约自然过期）。

use arc_swap::ArcSwap;
use futures::StreamExt;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::client::{EtcdClient, KeepAliveStream};
use crate::error::Result;

/// 申请租约并在租约下写入 key，返回租约 ID
pub(crate) async fn register_with_kv(
    client: &dyn EtcdClient,
    key: &str,
    value: Vec<u8>,
    ttl: Duration,
) -> Result<i64> {
    let lease_id = client.grant_lease(ttl.as_secs().max(1) as i64).await?;
    client.put_kv(key, value, Some(lease_id)).await?;
    Ok(lease_id)
}

enum HeartbeatState {
    Alive(KeepAliveStream),
    Registering,
    Stopped,
}

/// 单个实例 key 的心跳任务
pub(crate) struct Heartbeat {
    pub client: Arc<dyn EtcdClient>,
    pub key: String,
    /// 当前发布的值，`update` 会替换它，重新注册时使用最新值
    pub value: Arc<ArcSwap<Vec<u8>>>,
    /// 当前持有的租约，重新注册后更新
    pub lease_id: Arc<AtomicI64>,
    pub ttl: Duration,
    pub max_retry: usize,
    pub register_timeout: Duration,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
    pub cancel: CancellationToken,
}

impl Heartbeat {
    fn keep_alive_interval(&self) -> Duration {
        (self.ttl / 3).max(Duration::from_millis(100))
    }

    pub async fn run(self) {
        let lease_id = self.lease_id.load(Ordering::Acquire);
        let mut state = match self
            .client
            .keep_alive_lease(lease_id, self.keep_alive_interval())
            .await
        {
            Ok(stream) => HeartbeatState::Alive(stream),
            Err(e) => {
                warn!(key = %self.key, lease_id, error = %e, "Failed to open keep-alive stream");
                HeartbeatState::Registering
            }
        };

        loop {
            state = match state {
                HeartbeatState::Alive(stream) => self.alive(stream).await,
                HeartbeatState::Registering => self.reregister().await,
                HeartbeatState::Stopped => break,
            };
        }

        info!(key = %self.key, "🛑 Heartbeat task stopped");
    }

    async fn alive(&self, mut stream: KeepAliveStream) -> HeartbeatState {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return HeartbeatState::Stopped,
                msg = stream.next() => match msg {
                    Some(Ok(ttl)) => {
                        trace!(key = %self.key, ttl, "💓 Lease renewed");
                    }
                    Some(Err(e)) => {
                        warn!(key = %self.key, error = %e, "Keep-alive stream failed, re-registering");
                        return HeartbeatState::Registering;
                    }
                    None => {
                        warn!(key = %self.key, "Keep-alive stream closed, re-registering");
                        return HeartbeatState::Registering;
                    }
                },
            }
        }
    }

    async fn reregister(&self) -> HeartbeatState {
        // 已尝试过的退避倍数，每次失败从中随机挑一个，避免大量实例同时重连
        let mut retreat: Vec<u32> = Vec::with_capacity(self.max_retry);

        for attempt in 0..self.max_retry {
            if self.cancel.is_cancelled() {
                return HeartbeatState::Stopped;
            }

            let value = self.value.load_full().as_ref().clone();
            let registered = tokio::select! {
                _ = self.cancel.cancelled() => return HeartbeatState::Stopped,
                res = tokio::time::timeout(
                    self.register_timeout,
                    register_with_kv(self.client.as_ref(), &self.key, value, self.ttl),
                ) => res,
            };

            match registered {
                Ok(Ok(lease_id)) => {
                    self.lease_id.store(lease_id, Ordering::Release);
                    match self
                        .client
                        .keep_alive_lease(lease_id, self.keep_alive_interval())
                        .await
                    {
                        Ok(stream) => {
                            info!(key = %self.key, lease_id, attempt, "✅ Service re-registered");
                            return HeartbeatState::Alive(stream);
                        }
                        Err(e) => {
                            warn!(key = %self.key, lease_id, error = %e, "Failed to open keep-alive stream");
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!(key = %self.key, attempt, error = %e, "Re-registration failed");
                }
                Err(_) => {
                    warn!(key = %self.key, attempt, "Re-registration timed out");
                }
            }

            retreat.push(1u32 << attempt.min(16));
            let factor = retreat[rand::thread_rng().gen_range(0..retreat.len())];
            let delay = self.backoff_base.saturating_mul(factor).min(self.max_backoff);
            debug!(key = %self.key, attempt, delay_ms = delay.as_millis() as u64, "Backing off");

            tokio::select! {
                _ = self.cancel.cancelled() => return HeartbeatState::Stopped,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        error!(key = %self.key, max_retry = self.max_retry, "❌ Re-registration retries exhausted");
        HeartbeatState::Stopped
    }
}
