//! 节点与带权节点

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::registry::ServiceInstance;

/// 未声明或声明无效时的默认权重
pub const DEFAULT_WEIGHT: f64 = 100.0;

/// 元数据中表示初始权重的键
pub const WEIGHT_KEY: &str = "weight";

/// 一个可被选中的地址，由实例的某个端点派生
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub scheme: String,
    pub address: String,
    pub name: String,
    pub version: String,
    pub metadata: HashMap<String, String>,
    pub initial_weight: Option<f64>,
}

impl Node {
    /// 从实例派生节点；元数据中的 `weight` 可解析时作为初始权重
    pub fn new(scheme: impl Into<String>, address: impl Into<String>, instance: &ServiceInstance) -> Self {
        let initial_weight = instance
            .metadata
            .get(WEIGHT_KEY)
            .and_then(|w| w.trim().parse::<f64>().ok());
        Self {
            scheme: scheme.into(),
            address: address.into(),
            name: instance.name.clone(),
            version: instance.version.clone(),
            metadata: instance.metadata.clone(),
            initial_weight,
        }
    }

    /// 直连地址使用的节点，没有实例信息
    pub fn direct(scheme: impl Into<String>, address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            scheme: scheme.into(),
            name: address.clone(),
            address,
            version: String::new(),
            metadata: HashMap::new(),
            initial_weight: None,
        }
    }
}

/// 一次调用结束后回传给均衡器的信息
#[derive(Debug, Clone, Default)]
pub struct DoneInfo {
    pub err: Option<String>,
    pub bytes_sent: bool,
    pub bytes_received: bool,
    pub reply_md: Option<http::HeaderMap>,
}

impl DoneInfo {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_error(err: impl Into<String>) -> Self {
        Self {
            err: Some(err.into()),
            ..Self::default()
        }
    }
}

/// 调用完成回调，每次选择后恰好调用一次
pub type DoneFunc = Box<dyn FnOnce(DoneInfo) + Send>;

/// 空回调
pub fn noop_done() -> DoneFunc {
    Box::new(|_| {})
}

/// 带均衡器私有状态的节点
pub trait WeightedNode: Send + Sync {
    fn raw(&self) -> Arc<Node>;

    /// 有效权重
    fn weight(&self) -> f64;

    /// 记录一次选中，返回调用完成回调
    fn pick(&self) -> DoneFunc;

    /// 距上次选中经过的时间
    fn pick_elapsed(&self) -> Duration;
}

/// 为每次 `store` 构建新的带权节点
pub trait WeightedNodeBuilder: Send + Sync {
    fn build(&self, node: Arc<Node>) -> Arc<dyn WeightedNode>;
}

/// 直接使用初始权重的节点
pub struct DirectNode {
    node: Arc<Node>,
    last_pick: Mutex<Instant>,
}

impl DirectNode {
    pub fn new(node: Arc<Node>) -> Self {
        Self {
            node,
            last_pick: Mutex::new(Instant::now()),
        }
    }
}

impl WeightedNode for DirectNode {
    fn raw(&self) -> Arc<Node> {
        self.node.clone()
    }

    fn weight(&self) -> f64 {
        match self.node.initial_weight {
            Some(w) if w > 0.0 && w.is_finite() => w,
            _ => DEFAULT_WEIGHT,
        }
    }

    fn pick(&self) -> DoneFunc {
        *self.last_pick.lock() = Instant::now();
        noop_done()
    }

    fn pick_elapsed(&self) -> Duration {
        self.last_pick.lock().elapsed()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DirectNodeBuilder;

impl WeightedNodeBuilder for DirectNodeBuilder {
    fn build(&self, node: Arc<Node>) -> Arc<dyn WeightedNode> {
        Arc::new(DirectNode::new(node))
    }
}
