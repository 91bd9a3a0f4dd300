//! 核心模块
//!
//! 包含引擎配置。

pub mod config;

pub use config::{EngineConfig, EngineConfigBuilder, HostConfig, LogConfig, ModulesConfig};
