//! 内置节点过滤器

use std::sync::Arc;

use super::node::Node;

/// 节点过滤器，返回保留的节点
pub type NodeFilter = Arc<dyn Fn(&[Arc<Node>]) -> Vec<Arc<Node>> + Send + Sync>;

/// 只保留指定版本的节点
pub fn version(version: impl Into<String>) -> NodeFilter {
    let version = version.into();
    Arc::new(move |nodes: &[Arc<Node>]| {
        nodes
            .iter()
            .filter(|n| n.version == version)
            .cloned()
            .collect()
    })
}

/// 排除指定地址（例如上次失败的节点）
pub fn exclude_address(address: impl Into<String>) -> NodeFilter {
    let address = address.into();
    Arc::new(move |nodes: &[Arc<Node>]| {
        nodes
            .iter()
            .filter(|n| n.address != address)
            .cloned()
            .collect()
    })
}

/// 只保留元数据中 `key == value` 的节点
pub fn metadata(key: impl Into<String>, value: impl Into<String>) -> NodeFilter {
    let key = key.into();
    let value = value.into();
    Arc::new(move |nodes: &[Arc<Node>]| {
        nodes
            .iter()
            .filter(|n| n.metadata.get(&key).is_some_and(|v| *v == value))
            .cloned()
            .collect()
    })
}
