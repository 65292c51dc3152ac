//! 配置、错误与日志初始化测试

use std::collections::HashMap;
use std::io::Write;

use fox_discovery::config::{BackendType, Config, LogConfig};
use fox_discovery::error::{DiscoveryError, ErrorCategory, ErrorCode};
use fox_discovery::init_logging;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.registry.registry_type, BackendType::Etcd);
    assert_eq!(config.registry.etcd.prefix, "/fox");
    assert_eq!(config.registry.etcd.ttl, 15);
    assert_eq!(config.registry.consul.weight, 100);
    assert_eq!(config.resolver.balancer, "wrr");
    assert!(config.resolver.block);
    assert!(config.resolver.insecure);
    assert_eq!(config.resolver.timeout().as_secs(), 10);
    assert_eq!(config.log.level, "info");
}

#[test]
fn test_partial_toml() {
    let config = Config::from_toml_str(
        r#"
        [registry]
        registry_type = "consul"

        [registry.consul]
        address = "http://consul:8500"

        [resolver]
        balancer = "random"
        timeout_secs = 3
        "#,
    )
    .unwrap();

    assert_eq!(config.registry.registry_type, BackendType::Consul);
    assert_eq!(config.registry.consul.address, "http://consul:8500");
    assert!(config.registry.consul.healthy_only);
    assert_eq!(config.registry.etcd.ttl, 15);
    assert_eq!(config.resolver.balancer, "random");
    assert_eq!(config.resolver.timeout_secs, 3);
    assert!(config.resolver.block);
}

#[test]
fn test_invalid_toml() {
    let err = Config::from_toml_str("[registry\nregistry_type = 1").err().unwrap();
    assert!(matches!(err, DiscoveryError::Config(_)));

    let err = Config::from_toml_str("[registry]\nregistry_type = \"zookeeper\"").err().unwrap();
    assert_eq!(err.code(), ErrorCode::ConfigurationError);
}

#[test]
fn test_load_from_file() {
    let path = std::env::temp_dir().join(format!("fox-discovery-{}.toml", uuid::Uuid::new_v4()));
    {
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[registry.etcd]\nprefix = \"/apps\"\nttl = 30").unwrap();
    }

    let config = Config::load_from_file(path.to_str().unwrap()).unwrap();
    assert_eq!(config.registry.etcd.prefix, "/apps");
    assert_eq!(config.registry.etcd.ttl, 30);
    std::fs::remove_file(&path).unwrap();

    let err = Config::load_from_file("/definitely/not/here.toml").err().unwrap();
    assert!(matches!(err, DiscoveryError::Config(_)));
}

#[test]
fn test_overrides() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("FOX_REGISTRY_TYPE", "consul"),
        ("FOX_ETCD_ENDPOINTS", "http://a:2379, http://b:2379,"),
        ("FOX_REGISTRY_PREFIX", "/apps"),
        ("FOX_REGISTRY_TTL", "not-a-number"),
        ("FOX_BALANCER", "random"),
        ("FOX_LOG_LEVEL", "debug"),
    ]);

    let mut config = Config::default();
    config.apply_overrides_from(|key| vars.get(key).map(|v| v.to_string()));

    assert_eq!(config.registry.registry_type, BackendType::Consul);
    assert_eq!(config.registry.etcd.endpoints, vec!["http://a:2379", "http://b:2379"]);
    assert_eq!(config.registry.etcd.prefix, "/apps");
    // 无法解析的值保持原样
    assert_eq!(config.registry.etcd.ttl, 15);
    assert_eq!(config.registry.consul.address, "http://127.0.0.1:8500");
    assert_eq!(config.resolver.balancer, "random");
    assert_eq!(config.log.level, "debug");
}

#[test]
fn test_backend_type_from_str() {
    assert_eq!("ETCD".parse::<BackendType>().unwrap(), BackendType::Etcd);
    assert_eq!("consul".parse::<BackendType>().unwrap(), BackendType::Consul);
    assert!("nacos".parse::<BackendType>().is_err());
}

#[test]
fn test_error_codes() {
    let cases = [
        (DiscoveryError::NoAvailableNode, ErrorCode::NoAvailableNode, true),
        (DiscoveryError::BalancerNotFound("x".into()), ErrorCode::BalancerNotFound, false),
        (DiscoveryError::backend("down"), ErrorCode::RegistryUnavailable, true),
        (DiscoveryError::invalid_endpoint("::", "bad"), ErrorCode::InvalidEndpoint, false),
        (DiscoveryError::config("bad"), ErrorCode::ConfigurationError, false),
        (DiscoveryError::WatcherStopped, ErrorCode::WatcherStopped, false),
        (DiscoveryError::Cancelled, ErrorCode::OperationCancelled, false),
        (DiscoveryError::Timeout, ErrorCode::OperationTimeout, true),
    ];
    for (err, code, retryable) in cases {
        assert_eq!(err.code(), code, "{}", err);
        assert_eq!(err.is_retryable(), retryable, "{}", err);
    }

    assert_eq!(ErrorCode::NoAvailableNode.category(), ErrorCategory::Selection);
    assert_eq!(ErrorCode::WatcherStopped.category(), ErrorCategory::Registry);
    assert_eq!(ErrorCode::InvalidEndpoint.category(), ErrorCategory::Data);
    assert_eq!(ErrorCode::OperationTimeout.category(), ErrorCategory::General);
    assert_eq!(ErrorCode::NoAvailableNode.to_string(), "NO_AVAILABLE_NODE");

    assert!(DiscoveryError::Cancelled.is_cancelled());
    assert!(DiscoveryError::WatcherStopped.is_cancelled());
    assert!(!DiscoveryError::Timeout.is_cancelled());
}

#[cfg(feature = "grpc")]
#[test]
fn test_error_to_grpc_status() {
    let status: tonic::Status = DiscoveryError::NoAvailableNode.into();
    assert_eq!(status.code(), tonic::Code::Unavailable);
    assert_eq!(status.message(), "no available node");

    let status: tonic::Status = DiscoveryError::Timeout.into();
    assert_eq!(status.code(), tonic::Code::DeadlineExceeded);

    let status: tonic::Status = DiscoveryError::BalancerNotFound("p2c".into()).into();
    assert_eq!(status.code(), tonic::Code::FailedPrecondition);
}

#[test]
fn test_init_logging_only_once() {
    let config = LogConfig {
        level: "debug".to_string(),
        format: "json".to_string(),
    };
    assert!(init_logging(&config).is_ok());
    assert!(init_logging(&LogConfig::default()).is_err());
}
