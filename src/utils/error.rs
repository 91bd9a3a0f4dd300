//! 模块引擎错误类型定义
//!
//! 本模块定义了引擎中使用的所有错误类型：
//! - [`CoreError`] - 单次操作（启停、删除、配置加载）的同步错误
//! - [`DiscoveryError`] - 扫描阶段收集的批量错误，不中断整个扫描
//! - [`InstallError`] - 安装/升级单个安装包时的错误

use std::path::PathBuf;

use thiserror::Error;

/// 模块引擎核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 模块管理错误 ====================

    /// 模块未找到
    #[error("模块未找到: '{0}'")]
    ModuleNotFound(String),

    /// 模块目录不可写（无法写入/删除禁用标记）
    #[error("模块 '{0}' 的目录不可写")]
    ModuleNotWritable(String),

    /// 模块有依赖者，无法停用或删除
    #[error("模块 '{module}' 被以下模块依赖，请先停用它们: {}", .dependents.join(", "))]
    ModuleHasDependents {
        module: String,
        dependents: Vec<String>,
    },

    /// 模块存在未满足的依赖，无法启用
    #[error("模块 '{module}' 存在未满足的依赖: {}", .missing.join("; "))]
    UnmetDependencies {
        module: String,
        missing: Vec<String>,
    },

    /// 模块已启用
    #[error("模块已启用: '{0}'")]
    ModuleAlreadyEnabled(String),

    /// 模块已停用
    #[error("模块已停用: '{0}'")]
    ModuleAlreadyDisabled(String),

    /// 模块目录不在允许删除的根目录下
    #[error("不允许删除模块 '{module_id}': 目录 {path:?} 不在可删除的根目录下")]
    DeleteNotAllowed {
        module_id: String,
        path: PathBuf,
    },

    /// 无效的模块描述文件
    #[error("无效的模块描述文件: {0}")]
    InvalidMetadata(String),

    /// 循环依赖
    #[error("检测到循环依赖: {0}")]
    CircularDependency(String),

    // ==================== 安装错误 ====================

    /// 安装失败
    #[error(transparent)]
    Install(#[from] InstallError),

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue {
        key: String,
        reason: String,
    },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),
}

/// 引擎操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 扫描阶段错误
///
/// 这些错误不会中断扫描，而是与扫描结果一起返回，由调用方决定
/// 是中止启动还是降级运行。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// 描述文件存在但校验失败
    #[error("模块 '{module_id}' ({path:?}) 校验失败: {}", .messages.join("; "))]
    Validation {
        module_id: String,
        path: PathBuf,
        messages: Vec<String>,
    },

    /// 多个根目录下出现同一模块 ID
    #[error(
        "模块 '{module_id}' 重复: 保留 {kept:?} (版本 {kept_version})，拒绝 {rejected:?} (版本 {rejected_version})"
    )]
    Conflict {
        module_id: String,
        kept: PathBuf,
        kept_version: String,
        rejected: PathBuf,
        rejected_version: String,
    },

    /// 描述文件或目录无法读取
    #[error("无法读取 {path:?}: {reason}")]
    Unreadable {
        path: PathBuf,
        reason: String,
    },
}

impl DiscoveryError {
    /// 错误涉及的模块 ID（目录不可读时为 `None`）
    pub fn module_id(&self) -> Option<&str> {
        match self {
            DiscoveryError::Validation { module_id, .. } => Some(module_id),
            DiscoveryError::Conflict { module_id, .. } => Some(module_id),
            DiscoveryError::Unreadable { .. } => None,
        }
    }

    /// 是否为重复 ID 冲突
    pub fn is_conflict(&self) -> bool {
        matches!(self, DiscoveryError::Conflict { .. })
    }
}

/// 安装包错误
///
/// 任何一种安装错误都会中止本次安装，并保证临时文件和源安装包被清理。
#[derive(Error, Debug)]
pub enum InstallError {
    /// 安装包无法作为 zip 打开
    #[error("安装包 {archive:?} 已损坏: {reason}")]
    Corrupt {
        archive: PathBuf,
        reason: String,
    },

    /// 安装包为空
    #[error("安装包 {0:?} 为空")]
    Empty(PathBuf),

    /// 安装包根目录中没有描述文件
    #[error("安装包 {0:?} 的根目录中没有找到模块描述文件")]
    DescriptorMissing(PathBuf),

    /// 目标目录名不合法
    #[error("无法从安装包推导出合法的模块目录名: '{0}'")]
    InvalidDestination(String),

    /// 沙箱校验失败
    #[error("模块 '{module_id}' 的描述文件校验失败: {}", .errors.join("; "))]
    Validation {
        module_id: String,
        errors: Vec<String>,
    },

    /// 版本不比已安装版本新
    #[error("模块 '{module_id}' 已安装版本 {installed}，安装包版本 {candidate} 不是更新的版本")]
    NotNewer {
        module_id: String,
        installed: String,
        candidate: String,
    },

    /// 已安装模块的版本无法读取
    #[error("无法读取已安装模块 '{module_id}' 的版本: {reason}")]
    InstalledUnreadable {
        module_id: String,
        reason: String,
    },

    /// 没有配置安装根目录
    #[error("没有可用的安装根目录")]
    NoTargetRoot,

    /// 解压失败
    #[error("解压安装包失败: {0}")]
    Extraction(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 错误码常量
pub mod error_code {
    // 模块错误 (MODULE-xxx)
    pub const MODULE_NOT_FOUND: &str = "MODULE-001";
    pub const MODULE_NOT_WRITABLE: &str = "MODULE-002";
    pub const MODULE_HAS_DEPENDENTS: &str = "MODULE-003";
    pub const MODULE_UNMET_DEPENDENCIES: &str = "MODULE-004";
    pub const MODULE_STATE_CONFLICT: &str = "MODULE-005";
    pub const MODULE_DELETE_NOT_ALLOWED: &str = "MODULE-006";
    pub const MODULE_INVALID_METADATA: &str = "MODULE-007";
    pub const MODULE_CIRCULAR_DEPENDENCY: &str = "MODULE-008";

    // 安装错误 (INSTALL-xxx)
    pub const INSTALL_BAD_ARCHIVE: &str = "INSTALL-001";
    pub const INSTALL_VALIDATION_FAILED: &str = "INSTALL-002";
    pub const INSTALL_NOT_NEWER: &str = "INSTALL-003";
    pub const INSTALL_IO: &str = "INSTALL-004";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";

    // 其他
    pub const IO_ERROR: &str = "IO-001";
    pub const UNKNOWN: &str = "UNKNOWN";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::ModuleNotFound(_) => error_code::MODULE_NOT_FOUND,
            CoreError::ModuleNotWritable(_) => error_code::MODULE_NOT_WRITABLE,
            CoreError::ModuleHasDependents { .. } => error_code::MODULE_HAS_DEPENDENTS,
            CoreError::UnmetDependencies { .. } => error_code::MODULE_UNMET_DEPENDENCIES,
            CoreError::ModuleAlreadyEnabled(_) | CoreError::ModuleAlreadyDisabled(_) => {
                error_code::MODULE_STATE_CONFLICT
            }
            CoreError::DeleteNotAllowed { .. } => error_code::MODULE_DELETE_NOT_ALLOWED,
            CoreError::InvalidMetadata(_) | CoreError::Yaml(_) | CoreError::Json(_) => {
                error_code::MODULE_INVALID_METADATA
            }
            CoreError::CircularDependency(_) => error_code::MODULE_CIRCULAR_DEPENDENCY,
            CoreError::Install(e) => e.error_code(),
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            CoreError::Io(_) => error_code::IO_ERROR,
            CoreError::Internal(_) | CoreError::InitFailed(_) => error_code::UNKNOWN,
        }
    }

    /// 是否为启停/删除守卫失败（LifecycleError）
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(
            self,
            CoreError::ModuleNotWritable(_)
                | CoreError::ModuleHasDependents { .. }
                | CoreError::UnmetDependencies { .. }
                | CoreError::ModuleAlreadyEnabled(_)
                | CoreError::ModuleAlreadyDisabled(_)
                | CoreError::DeleteNotAllowed { .. }
        )
    }
}

impl InstallError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            InstallError::Corrupt { .. }
            | InstallError::Empty(_)
            | InstallError::DescriptorMissing(_)
            | InstallError::InvalidDestination(_) => error_code::INSTALL_BAD_ARCHIVE,
            InstallError::Validation { .. } | InstallError::InstalledUnreadable { .. } => {
                error_code::INSTALL_VALIDATION_FAILED
            }
            InstallError::NotNewer { .. } => error_code::INSTALL_NOT_NEWER,
            InstallError::NoTargetRoot | InstallError::Extraction(_) | InstallError::Io(_) => {
                error_code::INSTALL_IO
            }
        }
    }
}
