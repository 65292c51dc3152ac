//! 子连接选择器

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DiscoveryError, Result};
use crate::selector::{
    DefaultSelector, DoneFunc, DoneInfo, Node, SelectOptions, Selector, SelectorBuilder,
};

/// 一次选择的结果
pub struct PickResult<C> {
    pub node: Arc<Node>,
    pub conn: C,
    pub done: DoneFunc,
}

/// 基于一组就绪子连接的选择器，每次连接池变化都会重建
pub struct Picker<C> {
    selector: DefaultSelector,
    conns: HashMap<String, C>,
}

impl<C: Clone> Picker<C> {
    pub fn pick(&self, opts: &SelectOptions) -> Result<PickResult<C>> {
        let (node, done) = self.selector.select(opts)?;
        match self.conns.get(&node.address) {
            Some(conn) => Ok(PickResult {
                node,
                conn: conn.clone(),
                done,
            }),
            None => {
                done(DoneInfo::with_error("sub connection not ready"));
                Err(DiscoveryError::NoAvailableNode)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}

/// 每次构建都使用全新的选择器
#[derive(Clone)]
pub struct PickerBuilder {
    selector_builder: SelectorBuilder,
}

impl PickerBuilder {
    pub fn new(selector_builder: SelectorBuilder) -> Self {
        Self { selector_builder }
    }

    /// 只接受就绪的子连接
    pub fn build<C: Clone>(&self, ready: Vec<(Node, C)>) -> Picker<C> {
        let selector = self.selector_builder.build();
        let mut conns = HashMap::with_capacity(ready.len());
        let mut nodes = Vec::with_capacity(ready.len());
        for (node, conn) in ready {
            conns.insert(node.address.clone(), conn);
            nodes.push(node);
        }
        selector.store(nodes);
        Picker { selector, conns }
    }
}
