//! 错误处理模块
//!
//! 提供统一的错误类型、错误代码分类以及到 gRPC `Status` 的转换

pub mod code;
pub mod discovery_error;

pub use code::{ErrorCategory, ErrorCode};
pub use discovery_error::{DiscoveryError, Result};
