//! Fox Discovery
//!
//! 服务注册与发现核心库：注册中心后端（etcd 租约/心跳、Consul 订阅/拉取）、
//! 变更 watcher、节点选择与负载均衡，以及 HTTP / gRPC 传输层解析器。

pub mod config;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod registry;
pub mod resolver;
pub mod selector;

// Re-exports
pub use config::{
    BackendType, Config, ConsulConfig, EtcdConfig, LogConfig, RegistryConfig, ResolverConfig,
};
pub use error::{DiscoveryError, ErrorCategory, ErrorCode, Result};
pub use logging::init_logging;
pub use registry::{
    Discovery, InstanceState, Registrar, ServiceInstance, ServiceRegistry, Watcher,
    create_registry,
};
pub use resolver::{HttpResolver, Target, parse_target};
pub use selector::{
    DefaultSelector, DoneFunc, DoneInfo, Node, NodeFilter, SelectOptions, Selector,
    SelectorBuilder,
};

#[cfg(feature = "grpc")]
pub use resolver::grpc::{BalancedChannel, GrpcResolver};
