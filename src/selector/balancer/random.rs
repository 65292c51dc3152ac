//! 随机均衡

use rand::Rng;
use std::sync::Arc;

use super::{Balancer, BalancerBuilder};
use crate::error::{DiscoveryError, Result};
use crate::selector::node::{DoneFunc, WeightedNode};

pub const NAME: &str = "random";

/// 均匀随机选择，无状态
#[derive(Debug, Default)]
pub struct RandomBalancer;

impl Balancer for RandomBalancer {
    fn pick(&self, nodes: &[Arc<dyn WeightedNode>]) -> Result<(Arc<dyn WeightedNode>, DoneFunc)> {
        if nodes.is_empty() {
            return Err(DiscoveryError::NoAvailableNode);
        }
        let index = rand::thread_rng().gen_range(0..nodes.len());
        let selected = nodes[index].clone();
        let done = selected.pick();
        Ok((selected, done))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomBuilder;

impl BalancerBuilder for RandomBuilder {
    fn build(&self) -> Box<dyn Balancer> {
        Box::new(RandomBalancer)
    }
}
