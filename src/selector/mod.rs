//! 节点选择器
//!
//! 选择器持有一份可原子替换的节点快照；每次选择读取一次快照，
//! 依次应用过滤器，再交给均衡器挑选。

pub mod balancer;
pub mod filter;
pub mod node;

use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{DiscoveryError, Result};
pub use balancer::{Balancer, BalancerBuilder};
pub use filter::NodeFilter;
pub use node::{DirectNodeBuilder, DoneFunc, DoneInfo, Node, WeightedNode, WeightedNodeBuilder};

/// 单次选择的选项
#[derive(Clone, Default)]
pub struct SelectOptions {
    pub filters: Vec<NodeFilter>,
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: NodeFilter) -> Self {
        self.filters.push(filter);
        self
    }
}

impl std::fmt::Debug for SelectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectOptions")
            .field("filters", &self.filters.len())
            .finish()
    }
}

/// 节点选择器
pub trait Selector: Send + Sync {
    /// 用新的节点列表整体替换当前快照
    fn store(&self, nodes: Vec<Node>);

    /// 选出一个节点；没有候选时返回 `NoAvailableNode`
    fn select(&self, opts: &SelectOptions) -> Result<(Arc<Node>, DoneFunc)>;
}

type Snapshot = Arc<Vec<Arc<dyn WeightedNode>>>;

/// 默认选择器
pub struct DefaultSelector {
    node_builder: Arc<dyn WeightedNodeBuilder>,
    balancer: Box<dyn Balancer>,
    nodes: ArcSwap<Vec<Arc<dyn WeightedNode>>>,
}

impl DefaultSelector {
    pub fn new(node_builder: Arc<dyn WeightedNodeBuilder>, balancer: Box<dyn Balancer>) -> Self {
        Self {
            node_builder,
            balancer,
            nodes: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// 当前快照
    pub fn snapshot(&self) -> Snapshot {
        self.nodes.load_full()
    }

    pub fn len(&self) -> usize {
        self.nodes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.load().is_empty()
    }
}

impl Selector for DefaultSelector {
    fn store(&self, nodes: Vec<Node>) {
        let weighted: Vec<Arc<dyn WeightedNode>> = nodes
            .into_iter()
            .map(|n| self.node_builder.build(Arc::new(n)))
            .collect();
        debug!(nodes = weighted.len(), "Selector nodes replaced");
        self.nodes.store(Arc::new(weighted));
    }

    fn select(&self, opts: &SelectOptions) -> Result<(Arc<Node>, DoneFunc)> {
        let snapshot = self.nodes.load_full();

        let candidates: Vec<Arc<dyn WeightedNode>> = if opts.filters.is_empty() {
            snapshot.iter().cloned().collect()
        } else {
            let mut raws: Vec<Arc<Node>> = snapshot.iter().map(|n| n.raw()).collect();
            for filter in &opts.filters {
                raws = filter(&raws);
            }
            snapshot
                .iter()
                .filter(|wn| {
                    let raw = wn.raw();
                    raws.iter().any(|r| Arc::ptr_eq(r, &raw))
                })
                .cloned()
                .collect()
        };

        if candidates.is_empty() {
            return Err(DiscoveryError::NoAvailableNode);
        }

        let (selected, done) = self.balancer.pick(&candidates)?;
        Ok((selected.raw(), done))
    }
}

/// 按均衡器名称构建选择器
#[derive(Clone)]
pub struct SelectorBuilder {
    balancer: Arc<dyn BalancerBuilder>,
    node_builder: Arc<dyn WeightedNodeBuilder>,
}

impl SelectorBuilder {
    /// 查找已注册的均衡器；未注册时返回 `BalancerNotFound`
    pub fn try_new(balancer_name: &str) -> Result<Self> {
        let balancer = balancer::get(balancer_name)
            .ok_or_else(|| DiscoveryError::BalancerNotFound(balancer_name.to_string()))?;
        Ok(Self {
            balancer,
            node_builder: Arc::new(DirectNodeBuilder),
        })
    }

    /// # Panics
    ///
    /// 均衡器未注册时 panic，属于装配期的配置错误。
    pub fn new(balancer_name: &str) -> Self {
        match Self::try_new(balancer_name) {
            Ok(builder) => builder,
            Err(e) => panic!("{}", e),
        }
    }

    pub fn with_node_builder(mut self, node_builder: Arc<dyn WeightedNodeBuilder>) -> Self {
        self.node_builder = node_builder;
        self
    }

    pub fn build(&self) -> DefaultSelector {
        DefaultSelector::new(self.node_builder.clone(), self.balancer.build())
    }
}
