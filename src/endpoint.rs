//! 端点 URI 工具
//!
//! 端点格式为 `scheme://host:port`，例如 `grpc://127.0.0.1:9000`、`https://10.0.0.1:8443`。
//! 加密端点使用 `s` 后缀的 scheme（`https`、`grpcs`）。

use http::Uri;

use crate::error::{DiscoveryError, Result};

/// 根据是否加密返回 scheme，例如 `scheme("grpc", true) == "grpcs"`
pub fn scheme(base: &str, secure: bool) -> String {
    if secure {
        format!("{}s", base)
    } else {
        base.to_string()
    }
}

/// 构造端点字符串
pub fn new_endpoint(scheme: &str, host: &str) -> String {
    format!("{}://{}", scheme, host)
}

/// 解析端点，返回 `(scheme, host:port)`
pub fn parse(endpoint: &str) -> Result<(String, String)> {
    let uri: Uri = endpoint
        .parse()
        .map_err(|e: http::uri::InvalidUri| DiscoveryError::invalid_endpoint(endpoint, e.to_string()))?;

    let scheme = uri
        .scheme_str()
        .ok_or_else(|| DiscoveryError::invalid_endpoint(endpoint, "missing scheme"))?
        .to_string();
    let authority = uri
        .authority()
        .ok_or_else(|| DiscoveryError::invalid_endpoint(endpoint, "missing host"))?;

    // 去掉 userinfo
    let host = authority
        .as_str()
        .rsplit('@')
        .next()
        .unwrap_or_default()
        .to_string();
    if host.is_empty() {
        return Err(DiscoveryError::invalid_endpoint(endpoint, "missing host"));
    }

    Ok((scheme, host))
}

/// 在端点列表中查找第一个 scheme 匹配的端点，返回其 `host:port`
///
/// 任一端点格式错误都会直接返回错误；没有匹配项时返回 `Ok(None)`。
pub fn parse_endpoint(endpoints: &[String], scheme: &str) -> Result<Option<String>> {
    for endpoint in endpoints {
        let (s, host) = parse(endpoint)?;
        if s.eq_ignore_ascii_case(scheme) {
            return Ok(Some(host));
        }
    }
    Ok(None)
}
