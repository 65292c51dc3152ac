//! 解析器测试：目标解析、更新路径、HTTP 解析器
#![cfg(feature = "etcd")]

mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

use common::{MockEtcd, eventually, instance};
use fox_discovery::config::{EtcdConfig, ResolverConfig};
use fox_discovery::endpoint;
use fox_discovery::error::DiscoveryError;
use fox_discovery::registry::etcd::EtcdRegistry;
use fox_discovery::registry::{Discovery, InstanceState, Registrar, ServiceInstance};
use fox_discovery::resolver::{HttpResolver, Target, apply_update, build_nodes, parse_target};
use fox_discovery::selector::{SelectOptions, Selector, SelectorBuilder, filter};

fn fast_resolver_config() -> ResolverConfig {
    ResolverConfig {
        timeout_secs: 1,
        retry_delay_ms: 20,
        ..ResolverConfig::default()
    }
}

fn etcd_registry() -> (Arc<MockEtcd>, Arc<EtcdRegistry>) {
    let etcd = Arc::new(MockEtcd::new());
    let config = EtcdConfig {
        watch_resume_delay_ms: 20,
        ..EtcdConfig::default()
    };
    let registry = Arc::new(EtcdRegistry::new(etcd.clone(), config));
    (etcd, registry)
}

#[test]
fn test_parse_discovery_target() {
    assert_eq!(
        parse_target("discovery:///user-service").unwrap(),
        Target::Discovery {
            authority: String::new(),
            service: "user-service".to_string(),
        }
    );
    assert_eq!(
        parse_target("discovery://etcd/user-service").unwrap(),
        Target::Discovery {
            authority: "etcd".to_string(),
            service: "user-service".to_string(),
        }
    );
    assert!(parse_target("discovery:///").is_err());
}

#[test]
fn test_parse_direct_target() {
    assert_eq!(
        parse_target("127.0.0.1:9000, 127.0.0.1:9001").unwrap(),
        Target::Direct(vec!["127.0.0.1:9000".to_string(), "127.0.0.1:9001".to_string()])
    );
    assert_eq!(
        parse_target("http://10.0.0.1:8000").unwrap(),
        Target::Direct(vec!["10.0.0.1:8000".to_string()])
    );
    assert!(!parse_target("10.0.0.1:8000").unwrap().is_discovery());
    assert!(parse_target(" , ").is_err());
}

#[test]
fn test_endpoint_helpers() {
    assert_eq!(endpoint::scheme("grpc", true), "grpcs");
    assert_eq!(endpoint::scheme("http", false), "http");
    assert_eq!(endpoint::new_endpoint("grpc", "10.0.0.1:9000"), "grpc://10.0.0.1:9000");

    let (scheme, host) = endpoint::parse("grpc://10.0.0.1:9000?isSecure=false").unwrap();
    assert_eq!(scheme, "grpc");
    assert_eq!(host, "10.0.0.1:9000");

    let endpoints = vec!["grpc://10.0.0.1:9000".to_string(), "http://10.0.0.1:8000".to_string()];
    assert_eq!(
        endpoint::parse_endpoint(&endpoints, "http").unwrap(),
        Some("10.0.0.1:8000".to_string())
    );
    assert_eq!(endpoint::parse_endpoint(&endpoints, "https").unwrap(), None);

    let bad = vec!["not a uri".to_string()];
    assert!(matches!(
        endpoint::parse_endpoint(&bad, "http"),
        Err(DiscoveryError::InvalidEndpoint { .. })
    ));
}

#[test]
fn test_empty_update_keeps_previous_nodes() {
    let selector = SelectorBuilder::new("wrr").build();
    let instances = vec![instance("a", "svc", "http://10.0.0.1:8000")];
    assert!(apply_update(&selector, &instances, "http", false));

    assert!(!apply_update(&selector, &[], "http", false));
    // 只有 grpc 端点，翻译结果为空
    let grpc_only = vec![instance("b", "svc", "grpc://10.0.0.2:9000")];
    assert!(!apply_update(&selector, &grpc_only, "http", false));

    let (node, _) = selector.select(&SelectOptions::default()).unwrap();
    assert_eq!(node.address, "10.0.0.1:8000");
    assert_eq!(selector.len(), 1);
}

#[test]
fn test_build_nodes_skips_bad_instances() {
    let instances = vec![
        instance("ok", "svc", "http://10.0.0.1:8000"),
        ServiceInstance::with_id("bad", "svc").with_endpoint("::::"),
        instance("down", "svc", "http://10.0.0.3:8000").with_state(InstanceState::Unhealthy),
        instance("tls", "svc", "https://10.0.0.4:8443"),
    ];

    let nodes = build_nodes(&instances, "http", false);
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].address, "10.0.0.1:8000");
    assert_eq!(nodes[0].scheme, "http");
    assert_eq!(nodes[0].version, "v1");

    let secure = build_nodes(&instances, "http", true);
    assert_eq!(secure.len(), 1);
    assert_eq!(secure[0].address, "10.0.0.4:8443");
    assert_eq!(secure[0].scheme, "https");
}

#[tokio::test]
async fn test_http_resolver_follows_registry() {
    let (_etcd, registry) = etcd_registry();
    assert_ok!(registry.register(&instance("a", "svc", "http://10.0.0.1:8000")).await);
    assert_ok!(registry.register(&instance("b", "svc", "http://10.0.0.2:8000")).await);

    let discovery: Arc<dyn Discovery> = registry.clone();
    let resolver = assert_ok!(
        HttpResolver::new("discovery:///svc", Some(discovery), &fast_resolver_config()).await
    );
    assert_eq!(resolver.selector().len(), 2);

    let (node, done) = assert_ok!(resolver.select(&SelectOptions::default()));
    done(Default::default());
    assert!(node.address == "10.0.0.1:8000" || node.address == "10.0.0.2:8000");

    assert_ok!(registry.register(&instance("c", "svc", "http://10.0.0.3:8000")).await);
    let grown = eventually(Duration::from_secs(2), || {
        let len = resolver.selector().len();
        async move { len == 3 }
    })
    .await;
    assert!(grown);

    let opts = SelectOptions::new().with_filter(filter::exclude_address("10.0.0.1:8000"));
    for _ in 0..10 {
        let (node, _) = assert_ok!(resolver.select(&opts));
        assert_ne!(node.address, "10.0.0.1:8000");
    }

    resolver.close();
    resolver.close();
}

#[tokio::test]
async fn test_http_resolver_keeps_nodes_when_service_disappears() {
    let (_etcd, registry) = etcd_registry();
    let a = instance("a", "svc", "http://10.0.0.1:8000");
    assert_ok!(registry.register(&a).await);

    let discovery: Arc<dyn Discovery> = registry.clone();
    let resolver = assert_ok!(
        HttpResolver::new("discovery:///svc", Some(discovery), &fast_resolver_config()).await
    );

    assert_ok!(registry.deregister(&a).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (node, _) = assert_ok!(resolver.select(&SelectOptions::default()));
    assert_eq!(node.address, "10.0.0.1:8000");
}

#[tokio::test]
async fn test_http_resolver_block_times_out() {
    let (_etcd, registry) = etcd_registry();
    let discovery: Arc<dyn Discovery> = registry.clone();

    let started = tokio::time::Instant::now();
    let err = HttpResolver::new("discovery:///missing", Some(discovery), &fast_resolver_config())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, DiscoveryError::Timeout));
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_http_resolver_non_blocking_starts_empty() {
    let (_etcd, registry) = etcd_registry();
    let discovery: Arc<dyn Discovery> = registry.clone();
    let config = ResolverConfig {
        block: false,
        ..fast_resolver_config()
    };

    let resolver = assert_ok!(HttpResolver::new("discovery:///svc", Some(discovery), &config).await);
    assert!(matches!(
        resolver.select(&SelectOptions::default()),
        Err(DiscoveryError::NoAvailableNode)
    ));

    assert_ok!(registry.register(&instance("a", "svc", "http://10.0.0.1:8000")).await);
    let ready = eventually(Duration::from_secs(2), || {
        let ok = resolver.select(&SelectOptions::default()).is_ok();
        async move { ok }
    })
    .await;
    assert!(ready);
}

#[tokio::test]
async fn test_http_resolver_direct_target() {
    let resolver = assert_ok!(
        HttpResolver::new("127.0.0.1:8000,127.0.0.1:8001", None, &ResolverConfig::default()).await
    );
    assert_eq!(resolver.target(), "127.0.0.1:8000,127.0.0.1:8001");

    let (first, _) = assert_ok!(resolver.select(&SelectOptions::default()));
    let (second, _) = assert_ok!(resolver.select(&SelectOptions::default()));
    assert_ne!(first.address, second.address);
    assert_eq!(first.scheme, "http");
}

#[tokio::test]
async fn test_http_resolver_wiring_errors() {
    let err = HttpResolver::new("discovery:///svc", None, &ResolverConfig::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, DiscoveryError::Config(_)));

    let config = ResolverConfig {
        balancer: "no-such-balancer".to_string(),
        ..ResolverConfig::default()
    };
    let err = HttpResolver::new("127.0.0.1:8000", None, &config).await.err().unwrap();
    assert!(matches!(err, DiscoveryError::BalancerNotFound(_)));
}
