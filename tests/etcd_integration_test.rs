//! etcd 后端集成测试
//!
//! 需要运行中的 etcd，默认忽略：
//! ```bash
//! docker run -d --name etcd-test -p 2379:2379 quay.io/coreos/etcd:v3.5.9 \
//!   etcd --advertise-client-urls=http://127.0.0.1:2379 --listen-client-urls=http://0.0.0.0:2379
//! cargo test --test etcd_integration_test -- --ignored
//! ```
#![cfg(feature = "etcd")]

use std::time::Duration;
use tokio_test::assert_ok;

use fox_discovery::config::{EtcdConfig, ResolverConfig};
use fox_discovery::registry::etcd::EtcdRegistry;
use fox_discovery::registry::{Discovery, Registrar, ServiceInstance};
use fox_discovery::resolver::HttpResolver;
use fox_discovery::selector::SelectOptions;

/// 可通过 ETCD_ENDPOINTS 覆盖，逗号分隔
fn etcd_endpoints() -> Vec<String> {
    std::env::var("ETCD_ENDPOINTS")
        .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_else(|_| vec!["http://127.0.0.1:2379".to_string()])
}

fn test_config() -> EtcdConfig {
    EtcdConfig {
        endpoints: etcd_endpoints(),
        prefix: format!("/fox-test/{}", uuid::Uuid::new_v4()),
        ttl: 5,
        ..EtcdConfig::default()
    }
}

fn test_instance(service: &str, port: u16) -> ServiceInstance {
    ServiceInstance::new(service)
        .with_version("v1.0.0")
        .with_metadata("env", "test")
        .with_endpoint(format!("http://127.0.0.1:{}", port))
}

#[tokio::test]
#[ignore]
async fn test_register_discover_deregister() {
    let registry = assert_ok!(EtcdRegistry::connect(test_config()).await);
    let a = test_instance("echo", 18080);
    let b = test_instance("echo", 18081);

    assert_ok!(registry.register(&a).await);
    assert_ok!(registry.register(&b).await);

    let instances = assert_ok!(registry.get_service("echo").await);
    assert_eq!(instances.len(), 2);

    assert_ok!(registry.deregister(&a).await);
    let instances = assert_ok!(registry.get_service("echo").await);
    assert_eq!(instances, vec![b.clone()]);

    assert_ok!(registry.deregister(&b).await);
    registry.close();
}

#[tokio::test]
#[ignore]
async fn test_lease_outlives_ttl_while_heartbeating() {
    let registry = assert_ok!(EtcdRegistry::connect(test_config()).await);
    let inst = test_instance("heartbeat", 18090);
    assert_ok!(registry.register(&inst).await);

    // 超过 TTL 后仍然存在
    tokio::time::sleep(Duration::from_secs(8)).await;
    assert_eq!(assert_ok!(registry.get_service("heartbeat").await).len(), 1);

    assert_ok!(registry.deregister(&inst).await);
    assert!(assert_ok!(registry.get_service("heartbeat").await).is_empty());
}

#[tokio::test]
#[ignore]
async fn test_watch_and_resolve_through_etcd() {
    let registry = std::sync::Arc::new(assert_ok!(EtcdRegistry::connect(test_config()).await));
    let a = test_instance("gateway", 18100);
    assert_ok!(registry.register(&a).await);

    let discovery: std::sync::Arc<dyn Discovery> = registry.clone();
    let resolver = assert_ok!(
        HttpResolver::new("discovery:///gateway", Some(discovery), &ResolverConfig::default()).await
    );
    let (node, _) = assert_ok!(resolver.select(&SelectOptions::default()));
    assert_eq!(node.address, "127.0.0.1:18100");

    let b = test_instance("gateway", 18101);
    assert_ok!(registry.register(&b).await);
    let mut grown = false;
    for _ in 0..50 {
        if resolver.selector().len() == 2 {
            grown = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(grown);

    resolver.close();
    assert_ok!(registry.deregister(&a).await);
    assert_ok!(registry.deregister(&b).await);
}
