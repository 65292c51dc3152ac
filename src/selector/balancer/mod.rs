//! 负载均衡算法与全局注册表
//!
//! 内置 `random` 和 `wrr`，进程启动即可用；自定义均衡器需在构建解析器之前注册。

pub mod random;
pub mod wrr;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use super::node::{DoneFunc, WeightedNode};
use crate::error::Result;

/// 负载均衡器，从候选节点中选出一个
pub trait Balancer: Send + Sync {
    /// `nodes` 非空；返回选中的节点及其调用完成回调
    fn pick(&self, nodes: &[Arc<dyn WeightedNode>]) -> Result<(Arc<dyn WeightedNode>, DoneFunc)>;
}

/// 每个选择器构建一个独立的均衡器实例
pub trait BalancerBuilder: Send + Sync {
    fn build(&self) -> Box<dyn Balancer>;
}

static REGISTRY: LazyLock<RwLock<HashMap<String, Arc<dyn BalancerBuilder>>>> = LazyLock::new(|| {
    let mut builders: HashMap<String, Arc<dyn BalancerBuilder>> = HashMap::new();
    builders.insert(random::NAME.to_string(), Arc::new(random::RandomBuilder));
    builders.insert(wrr::NAME.to_string(), Arc::new(wrr::WrrBuilder));
    RwLock::new(builders)
});

/// 注册均衡器，同名覆盖
pub fn register(name: impl Into<String>, builder: Arc<dyn BalancerBuilder>) {
    let name = name.into();
    debug!(balancer = %name, "Balancer registered");
    REGISTRY.write().insert(name, builder);
}

/// 按名称查找均衡器
pub fn get(name: &str) -> Option<Arc<dyn BalancerBuilder>> {
    REGISTRY.read().get(name).cloned()
}

/// 已注册的均衡器名称
pub fn names() -> Vec<String> {
    let mut names: Vec<String> = REGISTRY.read().keys().cloned().collect();
    names.sort();
    names
}
