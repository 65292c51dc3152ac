//! 服务注册发现模块
//!
//! 定义与后端无关的注册/发现契约，以及两种后端实现：
//! - `etcd`：租约 + 心跳
//! - `consul`：订阅 + 拉取

pub mod factory;
pub mod instance;

#[cfg(feature = "consul")]
pub mod consul;
#[cfg(feature = "etcd")]
pub mod etcd;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
pub use factory::create_registry;
pub use instance::{InstanceState, ServiceInstance};

/// 服务注册接口
#[async_trait]
pub trait Registrar: Send + Sync {
    /// 注册实例；重试时幂等，会顺带启动后端的保活机制
    async fn register(&self, instance: &ServiceInstance) -> Result<()>;

    /// 在同一个 key 下重新发布实例，不改变租约
    async fn update(&self, instance: &ServiceInstance) -> Result<()>;

    /// 注销实例并停止保活；重复注销不报错
    async fn deregister(&self, instance: &ServiceInstance) -> Result<()>;
}

/// 服务发现接口
#[async_trait]
pub trait Discovery: Send + Sync {
    /// 读取某服务当前的实例列表
    async fn get_service(&self, name: &str) -> Result<Vec<ServiceInstance>>;

    /// 打开变更流
    async fn watch(&self, name: &str) -> Result<Arc<dyn Watcher>>;
}

/// 变更流游标
///
/// 首次 `next` 返回初始快照，之后阻塞直到后端通知变化或出错。
/// `stop` 之后不可再用，可重复调用且不会阻塞。
#[async_trait]
pub trait Watcher: Send + Sync {
    async fn next(&self) -> Result<Vec<ServiceInstance>>;

    async fn stop(&self) -> Result<()>;
}

/// 同时具备注册与发现能力的注册中心
pub trait ServiceRegistry: Registrar + Discovery {}

impl<T: Registrar + Discovery + ?Sized> ServiceRegistry for T {}
