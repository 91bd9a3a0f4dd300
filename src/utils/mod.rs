//! 工具模块
//!
//! 包含错误类型和日志系统。

pub mod error;
pub mod logger;

// 重导出常用类型
pub use error::{error_code, CoreError, DiscoveryError, InstallError, Result};
pub use logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
