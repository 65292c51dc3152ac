//! 目标地址解析
//!
//! - `discovery:///name` 或 `discovery://authority/name`：通过注册中心发现
//! - 其他：逗号分隔的直连地址列表，例如 `127.0.0.1:9000,127.0.0.1:9001`

use crate::endpoint;
use crate::error::{DiscoveryError, Result};

pub const DISCOVERY_SCHEME: &str = "discovery";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Discovery { authority: String, service: String },
    Direct(Vec<String>),
}

impl Target {
    pub fn is_discovery(&self) -> bool {
        matches!(self, Target::Discovery { .. })
    }
}

pub fn parse_target(target: &str) -> Result<Target> {
    let target = target.trim();
    let prefix = format!("{}://", DISCOVERY_SCHEME);

    if let Some(rest) = target.strip_prefix(&prefix) {
        let (authority, path) = rest.split_once('/').unwrap_or(("", rest));
        let service = path.trim_matches('/');
        if service.is_empty() {
            return Err(DiscoveryError::invalid_endpoint(target, "missing service name"));
        }
        return Ok(Target::Discovery {
            authority: authority.to_string(),
            service: service.to_string(),
        });
    }

    let addrs = target
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.contains("://") {
                endpoint::parse(s).map(|(_, host)| host)
            } else {
                Ok(s.to_string())
            }
        })
        .collect::<Result<Vec<_>>>()?;

    if addrs.is_empty() {
        return Err(DiscoveryError::invalid_endpoint(target, "empty target"));
    }
    Ok(Target::Direct(addrs))
}
