//! etcd 客户端抽象
//!
//! 注册中心只依赖这里定义的几个操作，真实实现基于 `etcd_client::Client`，
//! 测试中可替换为内存实现。

use async_trait::async_trait;
use etcd_client::{Client, GetOptions, PutOptions, WatchOptions};
use futures::stream::{self, BoxStream, StreamExt};
use std::time::Duration;

use crate::error::{DiscoveryError, Result};

/// 租约续期确认流，每一项为续期后的剩余 TTL（秒）；流结束或出错表示续期中断
pub type KeepAliveStream = BoxStream<'static, Result<i64>>;

/// 前缀变更通知流，每一项表示前缀下有变化
pub type WatchEventStream = BoxStream<'static, Result<()>>;

/// 注册中心使用的 etcd 操作集合
#[async_trait]
pub trait EtcdClient: Send + Sync + 'static {
    /// 申请租约，返回租约 ID
    async fn grant_lease(&self, ttl_secs: i64) -> Result<i64>;

    /// 写入 key，可绑定租约
    async fn put_kv(&self, key: &str, value: Vec<u8>, lease_id: Option<i64>) -> Result<()>;

    /// 读取前缀下的所有 value
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<Vec<u8>>>;

    /// 删除 key（key 不存在不报错）
    async fn delete_key(&self, key: &str) -> Result<()>;

    /// 撤销租约
    async fn revoke_lease(&self, lease_id: i64) -> Result<()>;

    /// 打开续期流，按 `interval` 周期发送续期请求
    async fn keep_alive_lease(&self, lease_id: i64, interval: Duration) -> Result<KeepAliveStream>;

    /// 打开前缀 watch
    async fn watch_prefix(&self, prefix: &str) -> Result<WatchEventStream>;
}

#[async_trait]
impl EtcdClient for Client {
    async fn grant_lease(&self, ttl_secs: i64) -> Result<i64> {
        let mut client = self.clone();
        let resp = client.lease_grant(ttl_secs, None).await?;
        Ok(resp.id())
    }

    async fn put_kv(&self, key: &str, value: Vec<u8>, lease_id: Option<i64>) -> Result<()> {
        let mut client = self.clone();
        let opts = lease_id.map(|id| PutOptions::new().with_lease(id));
        client.put(key, value, opts).await?;
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<Vec<u8>>> {
        let mut client = self.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        Ok(resp.kvs().iter().map(|kv| kv.value().to_vec()).collect())
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        let mut client = self.clone();
        client.delete(key, None).await?;
        Ok(())
    }

    async fn revoke_lease(&self, lease_id: i64) -> Result<()> {
        let mut client = self.clone();
        client.lease_revoke(lease_id).await?;
        Ok(())
    }

    async fn keep_alive_lease(&self, lease_id: i64, interval: Duration) -> Result<KeepAliveStream> {
        let mut client = self.clone();
        let (keeper, responses) = client.lease_keep_alive(lease_id).await?;

        let stream = stream::unfold(Some((keeper, responses, true)), move |state| async move {
            let Some((mut keeper, mut responses, first)) = state else {
                return None;
            };
            if !first {
                tokio::time::sleep(interval).await;
            }
            if let Err(e) = keeper.keep_alive().await {
                return Some((Err(DiscoveryError::from(e)), None));
            }
            match responses.message().await {
                Ok(Some(resp)) if resp.ttl() > 0 => {
                    Some((Ok(resp.ttl()), Some((keeper, responses, false))))
                }
                Ok(Some(_)) => Some((
                    Err(DiscoveryError::backend(format!("lease {} expired", lease_id))),
                    None,
                )),
                Ok(None) => None,
                Err(e) => Some((Err(DiscoveryError::from(e)), None)),
            }
        });

        Ok(stream.boxed())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchEventStream> {
        let mut client = self.clone();
        let (mut watcher, events) = client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await?;
        watcher.request_progress().await?;

        let stream = stream::unfold(Some((watcher, events)), |state| async move {
            let Some((watcher, mut events)) = state else {
                return None;
            };
            loop {
                match events.message().await {
                    Ok(Some(resp)) if resp.canceled() => {
                        return Some((Err(DiscoveryError::backend("watch canceled by server")), None));
                    }
                    // 进度通知不携带事件
                    Ok(Some(resp)) if resp.events().is_empty() => continue,
                    Ok(Some(_)) => return Some((Ok(()), Some((watcher, events)))),
                    Ok(None) => return None,
                    Err(e) => return Some((Err(DiscoveryError::from(e)), None)),
                }
            }
        });

        Ok(stream.boxed())
    }
}
