//! 平滑加权轮询（smooth weighted round robin）
//!
//! 每次选择时所有节点的当前权重加上各自的有效权重，选出当前权重最大者，
//! 再从它身上减去总权重。权重 2:1 的两个节点产生 `a b a` 交错序列而不是连续突发。

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{Balancer, BalancerBuilder};
use crate::error::{DiscoveryError, Result};
use crate::selector::node::{DoneFunc, WeightedNode};

pub const NAME: &str = "wrr";

/// 平滑加权轮询均衡器，按地址记录当前权重
#[derive(Default)]
pub struct WrrBalancer {
    current: Mutex<HashMap<String, f64>>,
}

impl WrrBalancer {
    /// 当前记录了权重状态的地址数
    pub fn tracked(&self) -> usize {
        self.current.lock().len()
    }
}

impl Balancer for WrrBalancer {
    fn pick(&self, nodes: &[Arc<dyn WeightedNode>]) -> Result<(Arc<dyn WeightedNode>, DoneFunc)> {
        if nodes.is_empty() {
            return Err(DiscoveryError::NoAvailableNode);
        }

        let mut total = 0.0;
        let mut selected: Option<(usize, f64)> = None;

        let mut current = self.current.lock();
        for (i, node) in nodes.iter().enumerate() {
            let weight = node.weight();
            total += weight;
            let cw = current.entry(node.raw().address.clone()).or_insert(0.0);
            *cw += weight;
            if selected.is_none_or(|(_, best)| *cw > best) {
                selected = Some((i, *cw));
            }
        }

        let Some((index, _)) = selected else {
            return Err(DiscoveryError::NoAvailableNode);
        };
        let node = nodes[index].clone();
        if let Some(cw) = current.get_mut(&node.raw().address) {
            *cw -= total;
        }
        // 节点集合收缩后清掉已下线地址的状态
        if current.len() > nodes.len() {
            let live: HashSet<String> = nodes.iter().map(|n| n.raw().address.clone()).collect();
            current.retain(|address, _| live.contains(address));
        }
        drop(current);

        let done = node.pick();
        Ok((node, done))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WrrBuilder;

impl BalancerBuilder for WrrBuilder {
    fn build(&self) -> Box<dyn Balancer> {
        Box::new(WrrBalancer::default())
    }
}
