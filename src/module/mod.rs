//! 模块引擎
//!
//! 包含模块引擎的核心组件（自底向上）：
//! - 版本比较、模块定义、描述文件解析
//! - 定义加载器与注册表扫描
//! - 依赖解析与生命周期管理
//! - 安装包安装器
//! - 扩展点注册表与外部协作者接口
//! - 模块管理器

pub mod dependency;
pub mod external;
pub mod hooks;
pub mod installer;
pub mod lifecycle;
pub mod loader;
pub mod manager;
pub mod metadata;
pub mod parser;
pub mod registry;
pub mod version;

// 重导出常用类型
pub use dependency::{DependencyGraph, DependencyResolver, ForcedDisable, HostInfo, Resolution};
pub use external::{
    AllowAll, CachedSource, FeedFileSource, MemoryNoticeSink, NoticeSink, PackageSource,
    PermissionCheck, RemotePackage, StaticPermissions, TracingNoticeSink,
};
pub use hooks::{DispatchReport, Hook, HookRegistry};
pub use installer::{BundleStatus, InstallOutcome, PackageBundle, PackageInstaller, Rejection};
pub use lifecycle::{CascadeReport, FailedDisable, LifecycleManager};
pub use loader::{DefinitionLoader, DescriptorSource};
pub use manager::{ModuleManager, SharedModuleManager, UpdateCandidate};
pub use metadata::{Capabilities, ModuleDefinition, ModuleState, ModuleType, Requirement};
pub use parser::{DescriptorMap, ModuleParser};
pub use registry::{DiscoveryReport, ModuleRegistry, DISABLE_MARKER};
pub use version::{compare_versions, ModuleVersion};
