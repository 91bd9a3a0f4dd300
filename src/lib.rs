//! # Chips Modules - 薯片模块引擎
//!
//! 为宿主应用发现、校验、排序、启停和安装插件/主题模块：
//!
//! - **注册表**: 扫描一个或多个根目录，按启用/停用/无效分组，处理跨根目录的重复 ID
//! - **依赖解析**: 计算缺失或版本不兼容的依赖、反向依赖，以及需要强制停用的模块
//! - **生命周期**: 启用、停用、删除，并给出确定性的加载顺序
//! - **安装器**: 沙箱校验安装包，只接受新模块或严格更高版本的升级
//! - **配置与日志**: YAML/JSON 配置文件，基于 tracing 的结构化日志
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use chips_modules::{EngineConfig, ModuleManager};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::builder()
//!         .root("/srv/app/modules")
//!         .host("core", "2.4.0")
//!         .build();
//!
//!     let manager = ModuleManager::start(config)?;
//!     for module in manager.load_order() {
//!         println!("{} {}", module.id, module.version);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 模块引擎各组件
//! - `core` - 引擎配置
//! - `utils` - 错误类型和日志系统

#![warn(rustdoc::missing_crate_level_docs)]

pub mod core;
pub mod module;
pub mod utils;

// 重导出常用类型，方便使用
pub use module::{
    compare_versions, CascadeReport, DependencyResolver, HookRegistry, HostInfo, InstallOutcome,
    LifecycleManager, ModuleDefinition, ModuleManager, ModuleRegistry, ModuleState, ModuleType,
    ModuleVersion, PackageInstaller, Requirement, SharedModuleManager,
};

pub use utils::logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
pub use utils::{error_code, CoreError, DiscoveryError, InstallError, Result};

pub use core::config::{EngineConfig, EngineConfigBuilder, HostConfig, LogConfig, ModulesConfig};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
